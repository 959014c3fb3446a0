//! The plugin registry.
//!
//! The registry is the single source of truth for which plugins are loaded and
//! which components can be rendered. It is read on every render and written by
//! uploads and unloads, so every mutation happens under one write lock and
//! readers only ever see whole transitions.
//!
//! Releasing a plugin is gated by a per-module reference count. Renders hold a
//! [`Lease`]; a module that is asked to unload while leased is hidden from
//! lookups immediately but keeps its execution context in the `Unloading`
//! state until the last lease is dropped.

use std::sync::{ Arc, Mutex, PoisonError, RwLock, RwLockReadGuard };
use std::sync::atomic::{ AtomicU8, AtomicU64, AtomicUsize, Ordering };
use std::sync::mpsc::{ Receiver, Sender, channel };
use chrono::{ DateTime, Utc };
use itertools::Itertools ;
use serde::Serialize ;
use thiserror::Error ;
use tracing::{ debug, error, info };

use crate::context::{ DispatchError, ExecutionContext };
use crate::discovery::{ ComponentDescriptor, Discovery, PluginMetadata };
use crate::loader::LoadedModule ;



/// Process-unique id of one uploaded module. Two uploads sharing an identity
/// always have different ids.
#[derive( Copy, Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize )]
pub struct ModuleId( u64 );

impl std::fmt::Display for ModuleId {
	fn fmt( &self, f: &mut std::fmt::Formatter ) -> std::fmt::Result {
		write!( f, "#{}", self.0 )
	}
}

/// Lifecycle state of a [`PluginModule`].
#[derive( Copy, Clone, Debug, Eq, Hash, PartialEq, Serialize )]
#[repr( u8 )]
pub enum PluginStatus {
	/// Accepted for loading, not yet visible.
	Loading = 0,
	/// Visible and renderable.
	Loaded = 1,
	/// Rejected while being committed; its context was discarded.
	Failed = 2,
	/// Hidden from lookups, waiting for outstanding renders to finish.
	Unloading = 3,
	/// Context released, removed from the registry.
	Unloaded = 4,
}

impl PluginStatus {
	fn from_u8( value: u8 ) -> Self {
		match value {
			0 => Self::Loading,
			1 => Self::Loaded,
			2 => Self::Failed,
			3 => Self::Unloading,
			_ => Self::Unloaded,
		}
	}
}

impl std::fmt::Display for PluginStatus {
	fn fmt( &self, f: &mut std::fmt::Formatter ) -> std::fmt::Result { write!( f, "{:?}", self )}
}

/// Errors returned by registry operations.
#[derive( Debug, Error )]
pub enum RegistryError {
	/// The module is still referenced by in-flight renders. Retry after they complete.
	#[error( "Plugin `{identity}` is in use by {holders} render(s)" )]
	Busy { identity: String, holders: usize },
	/// No module with this identity is loaded.
	#[error( "Plugin `{0}` is not loaded" )] NotFound( String ),
	/// The registry is in a state that should be impossible. Indicates a bug.
	#[error( "Registry invariant violated: {0}" )] Internal( String ),
}

/// Notification emitted after every committed status transition.
#[derive( Debug, Clone, PartialEq, Eq, Serialize )]
pub struct RegistryChanged {
	pub module_id: ModuleId,
	pub identity: String,
	pub status: PluginStatus,
}

/// Listing entry for the administrative UI.
#[derive( Debug, Clone, PartialEq, Eq, Serialize )]
#[serde( rename_all = "camelCase" )]
pub struct PluginSummary {
	pub identity: String,
	pub version: String,
	pub author: String,
	pub description: String,
	pub status: PluginStatus,
	pub component_count: usize,
	pub file_name: String,
	pub size_bytes: usize,
	pub loaded_at: Option<DateTime<Utc>>,
}

/// Result of committing a module with [`PluginRegistry::put`].
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct PutOutcome {
	/// The module that was loaded under the same identity before, if any.
	pub replaced: Option<ModuleId>,
	/// Whether the replaced module was released right away. `false` means it
	/// is `Unloading` until its renders finish.
	pub replaced_released: bool,
}

/// Result of an administrative unload.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum UnloadOutcome {
	/// The context was released immediately.
	Released,
	/// The module is hidden and will be released when these renders finish.
	Deferred { holders: usize },
}

/// One uploaded binary's runtime representation.
///
/// Owns the plugin's execution context exclusively. Shared as `Arc<PluginModule>`
/// between the registry and outstanding leases; the context inside is released
/// when the module reaches `Unloaded`, independently of how many `Arc`s remain.
pub struct PluginModule {
	id: ModuleId,
	metadata: PluginMetadata,
	file_name: String,
	size_bytes: usize,
	components: Vec<ComponentDescriptor>,
	loaded_at: Option<DateTime<Utc>>,
	status: AtomicU8,
	holders: AtomicUsize,
	context: Mutex<Option<ExecutionContext>>,
}

impl PluginModule {

	/// Assembles a module in the `Loading` state from a loaded component and
	/// what was discovered about it.
	pub fn new( id: ModuleId, loaded: LoadedModule, discovery: Discovery, file_name: impl Into<String> ) -> Self {
		let LoadedModule { context, size_bytes, .. } = loaded ;
		Self {
			id,
			metadata: discovery.metadata,
			file_name: file_name.into(),
			size_bytes,
			components: discovery.components,
			loaded_at: None,
			status: AtomicU8::new( PluginStatus::Loading as u8 ),
			holders: AtomicUsize::new( 0 ),
			context: Mutex::new( Some( context )),
		}
	}

	#[inline] pub fn id( &self ) -> ModuleId { self.id }
	#[inline] pub fn identity( &self ) -> &str { &self.metadata.name }
	#[inline] pub fn metadata( &self ) -> &PluginMetadata { &self.metadata }
	#[inline] pub fn version( &self ) -> &str { &self.metadata.version }
	#[inline] pub fn author( &self ) -> &str { &self.metadata.author }
	#[inline] pub fn description( &self ) -> &str { &self.metadata.description }
	#[inline] pub fn file_name( &self ) -> &str { &self.file_name }
	#[inline] pub fn size_bytes( &self ) -> usize { self.size_bytes }
	/// Components in discovery order.
	#[inline] pub fn components( &self ) -> &[ComponentDescriptor] { &self.components }
	/// Set when the module was committed as `Loaded`.
	#[inline] pub fn loaded_at( &self ) -> Option<DateTime<Utc>> { self.loaded_at }
	#[inline] pub fn status( &self ) -> PluginStatus { PluginStatus::from_u8( self.status.load( Ordering::SeqCst ))}
	/// Number of outstanding leases.
	#[inline] pub fn holders( &self ) -> usize { self.holders.load( Ordering::SeqCst )}

	/// Whether the execution context is still alive.
	pub fn has_live_context( &self ) -> bool {
		self.context.lock().map( | context | context.is_some() ).unwrap_or( false )
	}

	pub fn summary( &self ) -> PluginSummary {
		PluginSummary {
			identity: self.metadata.name.clone(),
			version: self.metadata.version.clone(),
			author: self.metadata.author.clone(),
			description: self.metadata.description.clone(),
			status: self.status(),
			component_count: self.components.len(),
			file_name: self.file_name.clone(),
			size_bytes: self.size_bytes,
			loaded_at: self.loaded_at,
		}
	}

	/// Runs `f` against the execution context, serialising calls into the store.
	pub(crate) fn with_context<R>( &self, f: impl FnOnce( &mut ExecutionContext ) -> Result<R, DispatchError> ) -> Result<R, DispatchError> {
		let mut lock = self.context.lock().map_err(|_| DispatchError::LockRejected )?;
		let context = lock.as_mut().ok_or( DispatchError::ContextReleased )?;
		f( context )
	}

	fn set_status( &self, status: PluginStatus ) {
		self.status.store( status as u8, Ordering::SeqCst );
	}

	fn take_context( &self ) -> Option<ExecutionContext> {
		self.context.lock().unwrap_or_else( PoisonError::into_inner ).take()
	}

	fn changed( &self ) -> RegistryChanged {
		RegistryChanged { module_id: self.id, identity: self.identity().to_string(), status: self.status() }
	}

}

impl std::fmt::Debug for PluginModule {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "PluginModule" )
			.field( "id", &self.id )
			.field( "metadata", &self.metadata )
			.field( "file_name", &self.file_name )
			.field( "status", &self.status() )
			.field( "holders", &self.holders() )
			.field( "components", &self.components )
			.finish_non_exhaustive()
	}
}

/// A counted reference to a loaded module, held for the duration of a render.
///
/// While any lease on a module exists, the module's execution context cannot be
/// released. Dropping the last lease of an `Unloading` module completes its unload.
pub struct Lease {
	module: Arc<PluginModule>,
	registry: Arc<PluginRegistry>,
}

impl Lease {
	#[inline] pub fn module( &self ) -> &Arc<PluginModule> { &self.module }
}

impl Drop for Lease {
	fn drop( &mut self ) {
		let previous = self.module.holders.fetch_sub( 1, Ordering::SeqCst );
		if previous == 1 && self.module.status() == PluginStatus::Unloading {
			self.registry.collect_retired();
		}
	}
}

impl std::fmt::Debug for Lease {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "Lease" ).field( "module", &self.module.id ).finish_non_exhaustive()
	}
}

#[derive( Default )]
struct RegistryState {
	/// `Loaded` modules in commit order.
	loaded: Vec<Arc<PluginModule>>,
	/// `Unloading` modules waiting for their leases to drain.
	retiring: Vec<Arc<PluginModule>>,
}

/// Side effects of one transition. Events are published before the write
/// lock is released, so subscribers see transitions in commit order. Contexts
/// are dropped after it.
#[derive( Default )]
struct Aftermath {
	events: Vec<RegistryChanged>,
	released: Vec<ExecutionContext>,
}

/// Concurrency-safe store of loaded plugins.
///
/// Created empty, shared as `Arc<PluginRegistry>`, and torn down with
/// [`shutdown`]( Self::shutdown ).
#[derive( Default )]
pub struct PluginRegistry {
	state: RwLock<RegistryState>,
	subscribers: Mutex<Vec<Sender<RegistryChanged>>>,
	next_id: AtomicU64,
}

impl PluginRegistry {

	pub fn new() -> Self { Self::default() }

	/// Allocates a fresh module id.
	pub fn next_module_id( &self ) -> ModuleId {
		ModuleId( self.next_id.fetch_add( 1, Ordering::Relaxed ) + 1 )
	}

	/// Subscribes to [`RegistryChanged`] notifications. Dropping the receiver unsubscribes.
	pub fn subscribe( &self ) -> Receiver<RegistryChanged> {
		let ( sender, receiver ) = channel();
		self.subscribers.lock().unwrap_or_else( PoisonError::into_inner ).push( sender );
		receiver
	}

	/// Commits `module` as `Loaded`.
	///
	/// If a module with the same identity is loaded, the new module becomes
	/// visible first and the old one is moved to `Unloading` in the same
	/// critical section, so no reader ever sees the identity missing. The old
	/// module's context is released once its leases drain.
	///
	/// # Errors
	/// Returns [`RegistryError::Internal`] if the module has no live context or
	/// the registry already holds several loaded modules of this identity. The
	/// module is marked `Failed` and its context dropped in that case.
	pub fn put( &self, mut module: PluginModule ) -> Result<PutOutcome, RegistryError> {

		module.loaded_at = Some( Utc::now() );
		module.set_status( PluginStatus::Loaded );
		let module = Arc::new( module );

		let mut aftermath = Aftermath::default();
		let result = self.write().and_then(| mut state | {
			let outcome = Self::commit( &mut state, &module, &mut aftermath );
			self.publish( &mut aftermath );
			outcome
		});

		if let Err( err ) = &result {
			error!( module_id = %module.id, identity = module.identity(), error = %err, "rejecting module at commit" );
			module.set_status( PluginStatus::Failed );
			aftermath.released.extend( module.take_context() );
		}
		self.finish( aftermath );
		result

	}

	fn commit(
		state: &mut RegistryState,
		module: &Arc<PluginModule>,
		aftermath: &mut Aftermath,
	) -> Result<PutOutcome, RegistryError> {

		if !module.has_live_context() {
			return Err( RegistryError::Internal( format!( "module {} has no execution context", module.id )));
		}

		let previous = state.loaded.iter()
			.positions(| loaded | loaded.identity() == module.identity() )
			.collect::<Vec<_>>();
		if previous.len() > 1 {
			return Err( RegistryError::Internal( format!(
				"{} modules loaded under identity `{}`", previous.len(), module.identity(),
			)));
		}

		state.loaded.push( Arc::clone( module ));
		aftermath.events.push( module.changed() );
		info!( module_id = %module.id, identity = module.identity(), version = module.version(), components = module.components.len(), "plugin loaded" );

		let Some( &index ) = previous.first() else {
			return Ok( PutOutcome { replaced: None, replaced_released: false });
		};
		let old = state.loaded.remove( index );
		Self::retire( state, &old, aftermath );
		let replaced_released = Self::finalize_drained( state, aftermath ).contains( &old.id );
		info!( module_id = %old.id, identity = old.identity(), released = replaced_released, "plugin replaced" );

		Ok( PutOutcome { replaced: Some( old.id ), replaced_released })

	}

	/// Returns the loaded module with this identity.
	pub fn get( &self, identity: &str ) -> Option<Arc<PluginModule>> {
		self.read().loaded.iter().find(| module | module.identity() == identity ).cloned()
	}

	/// Snapshot of all loaded modules in commit order.
	pub fn list_loaded( &self ) -> Vec<Arc<PluginModule>> {
		self.read().loaded.clone()
	}

	/// Snapshot of modules that are unloading but still leased.
	pub fn list_retiring( &self ) -> Vec<Arc<PluginModule>> {
		self.read().retiring.clone()
	}

	/// Listing entries for the administrative UI, in commit order.
	pub fn summaries( &self ) -> Vec<PluginSummary> {
		self.read().loaded.iter().map(| module | module.summary() ).collect()
	}

	/// Finds a renderable component by display name or qualified reference.
	///
	/// Only components of `Loaded` modules are reachable. If several loaded
	/// plugins expose the same name, the earliest committed one wins.
	pub fn lookup_component( &self, name: &str ) -> Option<ComponentDescriptor> {
		Self::find_component( &self.read(), name ).map(|( _, descriptor )| descriptor.clone() )
	}

	/// Takes a lease on the loaded module with this identity.
	///
	/// # Errors
	/// Returns [`RegistryError::NotFound`] if no module with this identity is loaded.
	pub fn acquire( self: &Arc<Self>, identity: &str ) -> Result<Lease, RegistryError> {
		let state = self.read();
		let module = state.loaded.iter()
			.find(| module | module.identity() == identity )
			.ok_or_else(|| RegistryError::NotFound( identity.to_string() ))?;
		Ok( self.lease( module ))
	}

	/// Looks up a component and leases its owner in one step, so the owner
	/// cannot be swapped between the lookup and the lease.
	pub(crate) fn acquire_component( self: &Arc<Self>, name: &str ) -> Option<( Lease, ComponentDescriptor )> {
		let state = self.read();
		let ( module, descriptor ) = Self::find_component( &state, name )?;
		Some(( self.lease( module ), descriptor.clone() ))
	}

	/// Administrative unload: hides the module now and releases its context
	/// as soon as no render holds it.
	///
	/// # Errors
	/// Returns [`RegistryError::NotFound`] if no module with this identity is loaded.
	pub fn unload( &self, identity: &str ) -> Result<UnloadOutcome, RegistryError> {
		let mut aftermath = Aftermath::default();
		let outcome = {
			let mut state = self.write()?;
			let index = state.loaded.iter()
				.position(| module | module.identity() == identity )
				.ok_or_else(|| RegistryError::NotFound( identity.to_string() ))?;
			let module = state.loaded.remove( index );
			Self::retire( &mut state, &module, &mut aftermath );
			let outcome = match Self::finalize_drained( &mut state, &mut aftermath ).contains( &module.id ) {
				true => UnloadOutcome::Released,
				false => UnloadOutcome::Deferred { holders: module.holders() },
			};
			self.publish( &mut aftermath );
			outcome
		};
		info!( identity, outcome = ?outcome, "plugin unload requested" );
		self.finish( aftermath );
		Ok( outcome )
	}

	/// Completes the unload of every module with this identity, loaded or
	/// retiring. Only valid when none of them is leased.
	///
	/// # Errors
	/// Returns [`RegistryError::Busy`] while renders still hold one of the
	/// modules (nothing changes in that case) and [`RegistryError::NotFound`] if
	/// no module with this identity exists.
	pub fn mark_unloaded( &self, identity: &str ) -> Result<(), RegistryError> {
		let mut aftermath = Aftermath::default();
		{
			let mut state = self.write()?;
			let holders = state.loaded.iter()
				.chain( state.retiring.iter() )
				.filter(| module | module.identity() == identity )
				.map(| module | module.holders() )
				.collect::<Vec<_>>();
			if holders.is_empty() { return Err( RegistryError::NotFound( identity.to_string() )); }
			let holders = holders.into_iter().sum::<usize>();
			if holders > 0 { return Err( RegistryError::Busy { identity: identity.to_string(), holders }); }

			let ( matching, rest ) = std::mem::take( &mut state.loaded ).into_iter()
				.partition::<Vec<_>, _>(| module | module.identity() == identity );
			state.loaded = rest ;
			matching.iter().for_each(| module | Self::retire( &mut state, module, &mut aftermath ));
			Self::finalize_drained( &mut state, &mut aftermath );
			self.publish( &mut aftermath );
		}
		self.finish( aftermath );
		Ok(())
	}

	/// Releases every `Unloading` module whose leases have drained. Returns how
	/// many were released.
	pub fn collect_retired( &self ) -> usize {
		let mut aftermath = Aftermath::default();
		let released = match self.write() {
			Ok( mut state ) => {
				let released = Self::finalize_drained( &mut state, &mut aftermath ).len();
				self.publish( &mut aftermath );
				released
			},
			Err( _ ) => 0,
		};
		self.finish( aftermath );
		released
	}

	/// Unloads everything. Leased modules finish unloading when their renders
	/// complete. Returns how many modules are still waiting on renders.
	pub fn shutdown( &self ) -> usize {
		let mut aftermath = Aftermath::default();
		let pending = match self.write() {
			Ok( mut state ) => {
				let loaded = std::mem::take( &mut state.loaded );
				loaded.iter().for_each(| module | Self::retire( &mut state, module, &mut aftermath ));
				Self::finalize_drained( &mut state, &mut aftermath );
				self.publish( &mut aftermath );
				state.retiring.len()
			},
			Err( _ ) => 0,
		};
		info!( pending, "plugin registry shut down" );
		self.finish( aftermath );
		pending
	}

	fn lease( self: &Arc<Self>, module: &Arc<PluginModule> ) -> Lease {
		// Leases are only handed out under the read lock, while the module is
		// still `Loaded`, so a retiring module's count can only go down.
		module.holders.fetch_add( 1, Ordering::SeqCst );
		Lease { module: Arc::clone( module ), registry: Arc::clone( self )}
	}

	fn find_component<'a>( state: &'a RegistryState, name: &str ) -> Option<( &'a Arc<PluginModule>, &'a ComponentDescriptor )> {
		state.loaded.iter().find_map(| module | module.components.iter()
			.find(| descriptor | descriptor.display_name() == name || descriptor.qualified_type_ref() == name )
			.map(| descriptor | ( module, descriptor ))
		)
	}

	fn retire( state: &mut RegistryState, module: &Arc<PluginModule>, aftermath: &mut Aftermath ) {
		module.set_status( PluginStatus::Unloading );
		aftermath.events.push( module.changed() );
		state.retiring.push( Arc::clone( module ));
	}

	/// Moves drained `Unloading` modules to `Unloaded`, returning their ids.
	fn finalize_drained( state: &mut RegistryState, aftermath: &mut Aftermath ) -> Vec<ModuleId> {
		let ( drained, waiting ) = std::mem::take( &mut state.retiring ).into_iter()
			.partition::<Vec<_>, _>(| module | module.holders() == 0 );
		state.retiring = waiting ;
		drained.iter()
			.map(| module | {
				module.set_status( PluginStatus::Unloaded );
				aftermath.events.push( module.changed() );
				aftermath.released.extend( module.take_context() );
				debug!( module_id = %module.id, identity = module.identity(), "plugin unloaded" );
				module.id
			})
			.collect()
	}

	/// Sends pending events to subscribers. Must be called with the write lock
	/// held. `mpsc` sends never block and `subscribe` never takes the state lock.
	fn publish( &self, aftermath: &mut Aftermath ) {
		if aftermath.events.is_empty() { return }
		let events = std::mem::take( &mut aftermath.events );
		let mut subscribers = self.subscribers.lock().unwrap_or_else( PoisonError::into_inner );
		subscribers.retain(| subscriber | events.iter().all(| event | subscriber.send( event.clone() ).is_ok() ));
	}

	/// Drops released contexts outside the lock.
	fn finish( &self, aftermath: Aftermath ) {
		debug_assert!( aftermath.events.is_empty(), "registry events left unpublished" );
		drop( aftermath.released );
	}

	fn read( &self ) -> RwLockReadGuard<'_, RegistryState> {
		self.state.read().unwrap_or_else(| poisoned | {
			error!( "plugin registry lock poisoned, serving last committed state" );
			poisoned.into_inner()
		})
	}

	fn write( &self ) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>, RegistryError> {
		self.state.write().map_err(|_| {
			error!( "plugin registry lock poisoned, refusing to mutate" );
			RegistryError::Internal( "registry lock poisoned".to_string() )
		})
	}

}

impl std::fmt::Debug for PluginRegistry {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		let state = self.read();
		f.debug_struct( "PluginRegistry" )
			.field( "loaded", &state.loaded )
			.field( "retiring", &state.retiring )
			.finish_non_exhaustive()
	}
}
