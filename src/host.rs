use std::sync::Arc ;
use std::sync::mpsc::Receiver ;
use thiserror::Error ;
use tracing::info ;
use wasmtime::Engine ;
use wasmtime::component::Linker ;

use crate::{ CancelToken, ConfigError, HostConfig };
use crate::discovery::ComponentDiscoverer ;
use crate::epoch::EpochTicker ;
use crate::gateway::{ RenderError, RenderGateway, RenderableHandle };
use crate::loader::IsolatedLoader ;
use crate::orchestrator::{ UploadError, UploadOrchestrator, UploadOutcome, UploadReceipt, UploadRequest, UploadWarning };
use crate::registry::{ PluginModule, PluginRegistry, PluginSummary, RegistryChanged, RegistryError, UnloadOutcome };
use crate::utils::PartialSuccess ;
use crate::validator::BinaryValidator ;



/// Errors raised while starting a [`PluginHost`].
#[derive( Debug, Error )]
pub enum HostError {
	#[error( "{0}" )] Config( #[from] ConfigError ),
	#[error( "Failed to create engine: {0}" )] Engine( wasmtime::Error ),
	#[error( "Failed to start epoch ticker: {0}" )] Ticker( std::io::Error ),
}

/// Owns the engine, the registry and everything wired around them.
///
/// The registry lives exactly as long as the host (plus any handle still
/// holding a lease). Dropping the host unloads every plugin and stops the
/// epoch ticker.
pub struct PluginHost {
	config: HostConfig,
	engine: Engine,
	registry: Arc<PluginRegistry>,
	orchestrator: UploadOrchestrator,
	gateway: RenderGateway,
	_ticker: EpochTicker,
}

impl PluginHost {

	/// Starts a host with its own engine and epoch ticker.
	///
	/// # Errors
	/// Returns [`HostError`] if the config is unusable, the engine cannot be
	/// created or the ticker thread cannot be spawned.
	pub fn new( config: HostConfig ) -> Result<Self, HostError> {

		let config = config.checked()?;

		let mut engine_config = wasmtime::Config::new();
		engine_config.wasm_component_model( true );
		engine_config.epoch_interruption( true );
		let engine = Engine::new( &engine_config ).map_err( HostError::Engine )?;
		let ticker = EpochTicker::start( engine.clone(), config.epoch_tick() ).map_err( HostError::Ticker )?;

		let registry = Arc::new( PluginRegistry::new() );
		let orchestrator = UploadOrchestrator::new(
			BinaryValidator::new( engine.clone(), &config ),
			IsolatedLoader::new( engine.clone(), Linker::new( &engine ), &config ),
			ComponentDiscoverer::new( engine.clone(), config.render_timeout() ),
			Arc::clone( &registry ),
		);
		let gateway = RenderGateway::new( Arc::clone( &registry ), config.render_timeout() );

		info!( config = ?config, "plugin host started" );
		Ok( Self { config, engine, registry, orchestrator, gateway, _ticker: ticker })

	}

	#[inline] pub fn config( &self ) -> &HostConfig { &self.config }
	#[inline] pub fn engine( &self ) -> &Engine { &self.engine }
	#[inline] pub fn registry( &self ) -> &Arc<PluginRegistry> { &self.registry }
	#[inline] pub fn gateway( &self ) -> &RenderGateway { &self.gateway }

	/// Number of execution contexts currently alive, whether committed or not.
	pub fn live_contexts( &self ) -> usize { self.orchestrator.loader().live_contexts() }

	/// Uploads a plugin binary. See [`UploadOrchestrator::upload`].
	///
	/// # Errors
	/// Returns the [`UploadError`] of the stage that failed.
	pub fn upload( &self, request: UploadRequest, cancel: &CancelToken ) -> Result<PartialSuccess<UploadReceipt, UploadWarning>, UploadError> {
		self.orchestrator.upload( request, cancel )
	}

	/// Uploads a plugin binary and reports the result in its wire shape.
	pub fn upload_outcome( &self, request: UploadRequest, cancel: &CancelToken ) -> UploadOutcome {
		let file_name = request.file_name.clone();
		UploadOutcome::from_result( &file_name, &self.upload( request, cancel ))
	}

	/// # Errors
	/// Returns [`RenderError::NotFound`] if no loaded plugin exposes `name`.
	pub fn resolve( &self, name: &str ) -> Result<RenderableHandle, RenderError> {
		self.gateway.resolve( name )
	}

	pub fn list_loaded( &self ) -> Vec<Arc<PluginModule>> { self.registry.list_loaded() }

	pub fn summaries( &self ) -> Vec<PluginSummary> { self.registry.summaries() }

	pub fn subscribe( &self ) -> Receiver<RegistryChanged> { self.registry.subscribe() }

	/// # Errors
	/// Returns [`RegistryError::NotFound`] if no plugin with this identity is loaded.
	pub fn unload( &self, identity: &str ) -> Result<UnloadOutcome, RegistryError> {
		self.registry.unload( identity )
	}

	/// Unloads every plugin. Returns how many are still waiting on renders.
	pub fn shutdown( &self ) -> usize { self.registry.shutdown() }

}

impl Drop for PluginHost {
	fn drop( &mut self ) {
		self.registry.shutdown();
	}
}

impl std::fmt::Debug for PluginHost {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "PluginHost" )
			.field( "config", &self.config )
			.field( "registry", &self.registry )
			.finish_non_exhaustive()
	}
}
