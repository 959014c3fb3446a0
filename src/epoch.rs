use std::sync::Arc ;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::thread::JoinHandle ;
use std::time::Duration ;
use tracing::{ debug, warn };
use wasmtime::Engine ;



/// Background thread advancing the engine epoch at a fixed interval.
///
/// Every store checks its deadline and cancel token when the epoch moves, so
/// the tick interval bounds how late a timeout or cancellation is noticed.
/// Stopped and joined on drop.
pub(crate) struct EpochTicker {
	stop: Arc<AtomicBool>,
	thread: Option<JoinHandle<()>>,
}

impl EpochTicker {

	pub(crate) fn start( engine: Engine, tick: Duration ) -> std::io::Result<Self> {
		let stop = Arc::new( AtomicBool::new( false ));
		let thread = {
			let stop = Arc::clone( &stop );
			std::thread::Builder::new()
				.name( "epoch-ticker".to_string() )
				.spawn( move || {
					while !stop.load( Ordering::Acquire ) {
						std::thread::park_timeout( tick );
						engine.increment_epoch();
					}
				})?
		};
		debug!( tick = ?tick, "epoch ticker started" );
		Ok( Self { stop, thread: Some( thread )})
	}

}

impl Drop for EpochTicker {
	fn drop( &mut self ) {
		self.stop.store( true, Ordering::Release );
		if let Some( thread ) = self.thread.take() {
			thread.thread().unpark();
			if thread.join().is_err() { warn!( "epoch ticker panicked" ); }
		}
	}
}
