//! Isolated loading.
//!
//! Loading happens in two phases. First the validated component is linked
//! against the host linker and instantiated inside a brand new store; any trap
//! raised by its start-up code, a blown time budget or a cancellation turns
//! into a [`LoadError`] and the store is dropped on the spot. Only when
//! instantiation fully succeeds is the store wrapped into an
//! [`ExecutionContext`] and handed back.

use std::sync::Arc ;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::time::Duration ;
use thiserror::Error ;
use tracing::{ debug, warn };
use wasmtime::Engine ;
use wasmtime::component::{ Component, Linker };

use crate::{ CancelToken, HostConfig };
use crate::context::{ ContextState, ExecutionContext, Interrupt, MemoryLimiter, new_store };
use crate::validator::ValidatedModule ;



/// Errors raised while materialising a component.
///
/// The partially initialised context is always discarded before one of
/// these is returned.
#[derive( Debug, Error )]
pub enum LoadError {
	/// The component imports something the host linker does not provide.
	#[error( "Missing dependency: {0}" )] Link( wasmtime::Error ),
	/// The component trapped while initialising.
	#[error( "Component failed to initialise: {0}" )] Instantiation( wasmtime::Error ),
	/// Initialisation outlived the load timeout.
	#[error( "Loading timed out after {0:?}" )] TimedOut( Duration ),
	/// The caller cancelled the upload while it was loading.
	#[error( "Loading cancelled" )] Cancelled,
}

/// A live component inside its own execution context.
pub struct LoadedModule {
	pub(crate) component: Component,
	pub(crate) context: ExecutionContext,
	pub(crate) size_bytes: usize,
}

impl std::fmt::Debug for LoadedModule {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "LoadedModule" )
			.field( "component", &"<Component>" )
			.field( "context", &self.context )
			.field( "size_bytes", &self.size_bytes )
			.finish()
	}
}

/// The only place execution contexts are created.
///
/// Also keeps the count of contexts that are currently alive, which drops as
/// soon as a context is released.
pub struct IsolatedLoader {
	engine: Engine,
	linker: Linker<ContextState>,
	timeout: Duration,
	max_memory_bytes: usize,
	live: Arc<AtomicUsize>,
}

impl IsolatedLoader {

	/// Creates a loader. The engine must have epoch interruption enabled,
	/// otherwise timeouts and cancellation are never observed.
	pub(crate) fn new( engine: Engine, linker: Linker<ContextState>, config: &HostConfig ) -> Self {
		Self {
			engine,
			linker,
			timeout: config.load_timeout(),
			max_memory_bytes: config.max_memory_bytes,
			live: Arc::new( AtomicUsize::new( 0 )),
		}
	}

	/// Number of execution contexts currently alive.
	pub fn live_contexts( &self ) -> usize { self.live.load( Ordering::Acquire )}

	/// Materialises a validated component in a fresh, unshared context.
	///
	/// # Errors
	/// Returns [`LoadError::Link`] for unresolved imports, [`LoadError::Instantiation`]
	/// for traps during start-up, and [`LoadError::TimedOut`] / [`LoadError::Cancelled`]
	/// when the host interrupted start-up.
	pub fn load( &self, validated: ValidatedModule, cancel: &CancelToken ) -> Result<LoadedModule, LoadError> {

		if cancel.is_cancelled() { return Err( LoadError::Cancelled ); }

		let ValidatedModule { component, size_bytes } = validated ;
		let instance_pre = self.linker.instantiate_pre( &component ).map_err( LoadError::Link )?;

		let mut store = new_store( &self.engine, ContextState::new( MemoryLimiter::new( self.max_memory_bytes )));
		store.data_mut().arm( self.timeout, Some( cancel.clone() ));
		store.set_epoch_deadline( 1 );
		let instantiated = instance_pre.instantiate( &mut store );
		let interrupt = store.data_mut().disarm();

		let instance = match ( instantiated, interrupt ) {
			( Ok( instance ), _ ) => instance,
			( Err( _ ), Some( Interrupt::TimedOut )) => {
				warn!( timeout = ?self.timeout, "component start-up timed out, discarding context" );
				return Err( LoadError::TimedOut( self.timeout ));
			},
			( Err( _ ), Some( Interrupt::Cancelled )) => return Err( LoadError::Cancelled ),
			( Err( err ), None ) => {
				warn!( error = %err, "component start-up failed, discarding context" );
				return Err( LoadError::Instantiation( err ));
			},
		};

		let context = ExecutionContext::new( store, instance, Arc::clone( &self.live ));
		debug!( size_bytes, live_contexts = self.live_contexts(), "component loaded" );
		Ok( LoadedModule { component, context, size_bytes })

	}

}
