//! Execution contexts.
//!
//! An [`ExecutionContext`] is one wasmtime [`Store`] together with the single
//! component [`Instance`] living in it. Nothing is shared between contexts, so a
//! trap or a runaway loop in one plugin cannot corrupt another. Dropping the
//! context drops the store, which reclaims the instance's linear memory and
//! tables; there is no other way to release one.

use std::sync::Arc ;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::time::{ Duration, Instant };
use thiserror::Error ;
use tracing::debug ;
use wasmtime::{ ResourceLimiter, Store, UpdateDeadline };
use wasmtime::component::{ Instance, Val };

use crate::CancelToken ;



/// Why the host stopped a running component.
#[derive( Debug, Error, Clone, Copy, PartialEq, Eq )]
pub enum Interrupt {
	/// The call or instantiation outlived its time budget.
	#[error( "Deadline exceeded" )] TimedOut,
	/// The caller's [`CancelToken`] was triggered.
	#[error( "Cancelled by caller" )] Cancelled,
}

/// Errors that can occur when calling into a loaded component.
#[derive( Debug, Error )]
pub enum DispatchError {
	/// Failed to acquire the lock on the context (a previous call panicked).
	#[error( "Lock Rejected" )] LockRejected,
	/// The context was already released.
	#[error( "Execution context released" )] ContextReleased,
	/// The specified interface path doesn't match any export.
	#[error( "Invalid Interface Path: {0}" )] InvalidInterfacePath( String ),
	/// The specified function doesn't exist on the interface.
	#[error( "Invalid Function: {0}" )] InvalidFunction( String ),
	/// Function was expected to return a value but didn't.
	#[error( "Missing Response" )] MissingResponse,
	/// Function returned something other than a string.
	#[error( "Unexpected Response: {0}" )] UnexpectedResponse( String ),
	/// The call was interrupted by the host.
	#[error( "Interrupted: {0}" )] Interrupted( Interrupt ),
	/// The WASM function trapped.
	#[error( "Runtime Exception: {0}" )] RuntimeException( wasmtime::Error ),
}

/// Caps linear memory growth of a single context.
pub(crate) struct MemoryLimiter {
	max_bytes: usize,
}

impl MemoryLimiter {
	pub(crate) fn new( max_bytes: usize ) -> Self { Self { max_bytes }}
}

impl ResourceLimiter for MemoryLimiter {
	fn memory_growing( &mut self, current: usize, desired: usize, _maximum: Option<usize> ) -> wasmtime::Result<bool> {
		let allowed = desired <= self.max_bytes ;
		if !allowed { debug!( current, desired, max = self.max_bytes, "memory growth denied" ); }
		Ok( allowed )
	}
	fn table_growing( &mut self, _current: usize, _desired: usize, _maximum: Option<usize> ) -> wasmtime::Result<bool> {
		Ok( true )
	}
}

/// Data stored inside each context's [`Store`].
pub(crate) struct ContextState {
	limiter: MemoryLimiter,
	deadline: Option<Instant>,
	cancel: Option<CancelToken>,
	interrupt: Option<Interrupt>,
}

impl ContextState {

	pub(crate) fn new( limiter: MemoryLimiter ) -> Self {
		Self { limiter, deadline: None, cancel: None, interrupt: None }
	}

	/// Starts a bounded section. `None` as deadline means the section only
	/// ends on cancellation.
	pub(crate) fn arm( &mut self, timeout: Duration, cancel: Option<CancelToken> ) {
		self.deadline = Instant::now().checked_add( timeout );
		self.cancel = cancel ;
		self.interrupt = None ;
	}

	/// Ends a bounded section, returning what interrupted it, if anything.
	pub(crate) fn disarm( &mut self ) -> Option<Interrupt> {
		self.cancel = None ;
		self.deadline = None ;
		self.interrupt.take()
	}

	fn poll( &mut self ) -> Option<Interrupt> {
		let reason = match ( &self.cancel, self.deadline ) {
			( Some( cancel ), _ ) if cancel.is_cancelled() => Some( Interrupt::Cancelled ),
			( _, Some( deadline )) if Instant::now() >= deadline => Some( Interrupt::TimedOut ),
			_ => None,
		};
		if reason.is_some() { self.interrupt = reason ; }
		reason
	}

}

/// Creates a store that checks its interrupt conditions on every epoch tick.
///
/// Requires an engine with epoch interruption enabled.
pub(crate) fn new_store( engine: &wasmtime::Engine, state: ContextState ) -> Store<ContextState> {
	let mut store = Store::new( engine, state );
	store.limiter(| state | &mut state.limiter );
	store.set_epoch_deadline( 1 );
	store.epoch_deadline_callback(| mut ctx | match ctx.data_mut().poll() {
		Some( reason ) => Err( wasmtime::Error::new( reason )),
		None => Ok( UpdateDeadline::Continue( 1 )),
	});
	store
}

/// An isolated, independently releasable home for one loaded component.
///
/// Created only by the [`IsolatedLoader`]( crate::IsolatedLoader ).
pub struct ExecutionContext {
	store: Store<ContextState>,
	instance: Instance,
	live: Arc<AtomicUsize>,
}

impl ExecutionContext {

	const PLACEHOLDER_VAL: Val = Val::Tuple( vec![] );

	/// Takes ownership of a successfully instantiated store and counts it as live.
	pub(crate) fn new( store: Store<ContextState>, instance: Instance, live: Arc<AtomicUsize> ) -> Self {
		live.fetch_add( 1, Ordering::AcqRel );
		Self { store, instance, live }
	}

	/// Calls a `func() -> string` exported from `interface_path` under a time budget.
	pub(crate) fn call_string(
		&mut self,
		interface_path: &str,
		function_name: &str,
		timeout: Duration,
	) -> Result<String, DispatchError> {

		let interface_index = self.instance
			.get_export_index( &mut self.store, None, interface_path )
			.ok_or( DispatchError::InvalidInterfacePath( interface_path.to_string() ))?;
		let func_index = self.instance
			.get_export_index( &mut self.store, Some( &interface_index ), function_name )
			.ok_or( DispatchError::InvalidFunction( format!( "{}:{}", interface_path, function_name )))?;
		let func = self.instance
			.get_func( &mut self.store, func_index )
			.ok_or( DispatchError::InvalidFunction( format!( "{}:{}", interface_path, function_name )))?;

		let mut buffer = vec![ Self::PLACEHOLDER_VAL ];
		self.store.data_mut().arm( timeout, None );
		self.store.set_epoch_deadline( 1 );
		let call_result = func.call( &mut self.store, &[], &mut buffer );
		let interrupt = self.store.data_mut().disarm();

		call_result.map_err(| err | match interrupt {
			Some( reason ) => DispatchError::Interrupted( reason ),
			None => DispatchError::RuntimeException( err ),
		})?;
		let _ = func.post_return( &mut self.store );

		match buffer.pop() {
			Some( Val::String( value )) => Ok( value ),
			Some( other ) => Err( DispatchError::UnexpectedResponse( format!( "{:?}", other ))),
			None => Err( DispatchError::MissingResponse ),
		}

	}

}

impl Drop for ExecutionContext {
	fn drop( &mut self ) {
		let remaining = self.live.fetch_sub( 1, Ordering::AcqRel ).saturating_sub( 1 );
		debug!( live_contexts = remaining, "execution context released" );
	}
}

impl std::fmt::Debug for ExecutionContext {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "ExecutionContext" )
			.field( "live_contexts", &self.live.load( Ordering::Acquire ))
			.finish_non_exhaustive()
	}
}
