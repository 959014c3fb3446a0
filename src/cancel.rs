use std::sync::Arc ;
use std::sync::atomic::{ AtomicBool, Ordering };



/// Cooperative cancellation flag for an in-flight upload.
///
/// Cloning yields another handle to the same flag, so the caller keeps one
/// clone and passes another into [`PluginHost::upload`]( crate::PluginHost::upload ).
/// The orchestrator checks the flag between stages and the loader checks it on
/// every epoch tick while a component is instantiating. Once an upload reaches
/// its commit stage the flag is ignored.
#[derive( Debug, Clone, Default )]
pub struct CancelToken( Arc<AtomicBool> );

impl CancelToken {

	pub fn new() -> Self { Self::default() }

	/// Requests cancellation. Idempotent.
	pub fn cancel( &self ) { self.0.store( true, Ordering::Release ); }

	pub fn is_cancelled( &self ) -> bool { self.0.load( Ordering::Acquire )}

}
