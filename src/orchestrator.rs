//! Upload orchestration.
//!
//! An upload walks through `Received → Validating → Loading → Discovering →
//! Committing` and ends in `Succeeded` or `Failed`. Everything before
//! `Committing` works on private state only, so a failure there leaves the
//! registry exactly as it was and drops the half-built execution context.

use std::collections::HashSet ;
use std::sync::{ Arc, Condvar, Mutex, PoisonError };
use std::time::Duration ;
use serde::Serialize ;
use thiserror::Error ;
use tracing::{ debug, info, info_span, warn };

use crate::CancelToken ;
use crate::discovery::{ ComponentDescriptor, ComponentDiscoverer, DiscoveryError };
use crate::loader::{ IsolatedLoader, LoadError };
use crate::registry::{ ModuleId, PluginModule, PluginRegistry, RegistryError };
use crate::utils::PartialSuccess ;
use crate::validator::{ BinaryValidator, ValidationError };


/// How often a queued upload rechecks its cancel token while waiting for its identity.
const CANCEL_POLL: Duration = Duration::from_millis( 5 );

/// A plugin binary handed over by the (external) upload surface.
#[derive( Debug, Clone )]
pub struct UploadRequest {
	pub bytes: Vec<u8>,
	pub file_name: String,
	/// Content type declared by the client, if any.
	pub content_type: Option<String>,
}

impl UploadRequest {

	pub fn new( file_name: impl Into<String>, bytes: impl Into<Vec<u8>> ) -> Self {
		Self { bytes: bytes.into(), file_name: file_name.into(), content_type: None }
	}

	pub fn with_content_type( mut self, content_type: impl Into<String> ) -> Self {
		self.content_type = Some( content_type.into() );
		self
	}

}

/// Where an upload is in its pipeline.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize )]
pub enum UploadStage {
	Received,
	Validating,
	Loading,
	Discovering,
	Committing,
	Succeeded,
	Failed,
}

impl std::fmt::Display for UploadStage {
	fn fmt( &self, f: &mut std::fmt::Formatter ) -> std::fmt::Result { write!( f, "{:?}", self )}
}

/// Things worth telling the uploader that did not stop the upload.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum UploadWarning {
	/// The plugin loaded but exposes nothing renderable.
	#[error( "Plugin exposes no renderable components" )] NoComponents,
	/// An exported instance does not export a usable `render` function.
	#[error( "Export `{0}` is not a renderable component" )] SkippedExport( String ),
}

/// Why an upload failed. Every variant except [`UploadError::Registry`]
/// guarantees the registry was not touched.
#[derive( Debug, Error )]
pub enum UploadError {
	#[error( "{0}" )] Validation( #[from] ValidationError ),
	#[error( "{0}" )] Load( #[from] LoadError ),
	#[error( "{0}" )] Discovery( #[from] DiscoveryError ),
	#[error( "{0}" )] Registry( #[from] RegistryError ),
	/// The caller cancelled the upload before it reached `Committing`.
	#[error( "Upload cancelled while {stage}" )] Cancelled { stage: UploadStage },
}

impl UploadError {
	/// The stage the upload failed in.
	pub fn stage( &self ) -> UploadStage {
		match self {
			Self::Validation( _ ) => UploadStage::Validating,
			Self::Load( _ ) => UploadStage::Loading,
			Self::Discovery( _ ) => UploadStage::Discovering,
			Self::Registry( _ ) => UploadStage::Committing,
			Self::Cancelled { stage } => *stage,
		}
	}
}

/// What a successful upload produced.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct UploadReceipt {
	pub module_id: ModuleId,
	pub identity: String,
	pub version: String,
	pub file_name: String,
	/// Components that became renderable, in discovery order.
	pub components: Vec<ComponentDescriptor>,
	/// The module this upload replaced, if the identity was already loaded.
	pub replaced: Option<ModuleId>,
}

#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize )]
pub enum OutcomeStatus { Succeeded, Failed }

/// Wire shape of an upload result for the administrative UI.
#[derive( Debug, Clone, PartialEq, Eq, Serialize )]
#[serde( rename_all = "camelCase" )]
pub struct UploadOutcome {
	pub status: OutcomeStatus,
	pub message: String,
	pub components_added: usize,
	#[serde( skip_serializing_if = "Vec::is_empty" )]
	pub warnings: Vec<String>,
}

impl UploadOutcome {

	pub fn from_result(
		file_name: &str,
		result: &Result<PartialSuccess<UploadReceipt, UploadWarning>, UploadError>,
	) -> Self {
		match result {
			Ok(( receipt, warnings )) => Self {
				status: OutcomeStatus::Succeeded,
				message: format!( "Successfully uploaded {}", file_name ),
				components_added: receipt.components.len(),
				warnings: warnings.iter().map( ToString::to_string ).collect(),
			},
			Err( err ) => Self {
				status: OutcomeStatus::Failed,
				message: err.to_string(),
				components_added: 0,
				warnings: Vec::new(),
			},
		}
	}

}

/// Serialises uploads that share an identity. Entries exist only while held.
#[derive( Default )]
struct IdentityLocks {
	held: Mutex<HashSet<String>>,
	released: Condvar,
}

struct IdentityGuard<'a> {
	locks: &'a IdentityLocks,
	identity: String,
}

impl IdentityLocks {
	/// Waits until no other upload holds `identity`, or until `cancel` fires.
	fn lock( &self, identity: &str, cancel: &CancelToken ) -> Result<IdentityGuard<'_>, UploadError> {
		let mut held = self.held.lock().unwrap_or_else( PoisonError::into_inner );
		while held.contains( identity ) {
			if cancel.is_cancelled() { return Err( UploadError::Cancelled { stage: UploadStage::Committing }); }
			held = self.released
				.wait_timeout_while( held, CANCEL_POLL, | held | held.contains( identity ) && !cancel.is_cancelled() )
				.unwrap_or_else( PoisonError::into_inner )
				.0 ;
		}
		held.insert( identity.to_string() );
		Ok( IdentityGuard { locks: self, identity: identity.to_string() })
	}
}

impl Drop for IdentityGuard<'_> {
	fn drop( &mut self ) {
		self.locks.held.lock().unwrap_or_else( PoisonError::into_inner ).remove( &self.identity );
		self.locks.released.notify_all();
	}
}

/// Drives uploads through validation, loading, discovery and commit.
pub struct UploadOrchestrator {
	validator: BinaryValidator,
	loader: IsolatedLoader,
	discoverer: ComponentDiscoverer,
	registry: Arc<PluginRegistry>,
	identity_locks: IdentityLocks,
}

impl UploadOrchestrator {

	pub fn new(
		validator: BinaryValidator,
		loader: IsolatedLoader,
		discoverer: ComponentDiscoverer,
		registry: Arc<PluginRegistry>,
	) -> Self {
		Self { validator, loader, discoverer, registry, identity_locks: IdentityLocks::default() }
	}

	#[inline] pub fn loader( &self ) -> &IsolatedLoader { &self.loader }

	/// Runs one upload to completion.
	///
	/// Uploads of the same identity are serialised from the moment the identity
	/// is read until the commit finishes; distinct identities never wait on each
	/// other. `cancel` is honoured until `Committing` begins.
	///
	/// # Errors
	/// Returns the [`UploadError`] of the failing stage. The registry and the
	/// live-context count are unchanged afterwards.
	pub fn upload(
		&self,
		request: UploadRequest,
		cancel: &CancelToken,
	) -> Result<PartialSuccess<UploadReceipt, UploadWarning>, UploadError> {

		let span = info_span!( "upload", file = %request.file_name );
		let _enter = span.enter();

		let result = self.run( request, cancel );
		match &result {
			Ok(( receipt, warnings )) => info!(
				stage = %UploadStage::Succeeded,
				module_id = %receipt.module_id,
				identity = %receipt.identity,
				components = receipt.components.len(),
				warnings = warnings.len(),
				"upload succeeded"
			),
			Err( err ) => warn!( stage = %UploadStage::Failed, failed_in = %err.stage(), error = %err, "upload failed" ),
		}
		result

	}

	fn run(
		&self,
		request: UploadRequest,
		cancel: &CancelToken,
	) -> Result<PartialSuccess<UploadReceipt, UploadWarning>, UploadError> {

		let UploadRequest { bytes, file_name, content_type } = request ;
		enter( UploadStage::Received );
		debug!( size_bytes = bytes.len(), content_type = ?content_type, "upload received" );

		checkpoint( cancel, UploadStage::Validating )?;
		let validated = self.validator.validate( &bytes, content_type.as_deref() )?;
		drop( bytes );

		checkpoint( cancel, UploadStage::Loading )?;
		let mut loaded = self.loader.load( validated, cancel )?;

		checkpoint( cancel, UploadStage::Discovering )?;
		let discovery = self.discoverer.discover( &mut loaded )?;

		let identity = discovery.metadata.name.clone();
		let _guard = self.identity_locks.lock( &identity, cancel )?;
		checkpoint( cancel, UploadStage::Committing )?;

		let warnings = match discovery.components.is_empty() {
			true => vec![ UploadWarning::NoComponents ],
			false => Vec::new(),
		}.into_iter()
			.chain( discovery.skipped.iter().cloned().map( UploadWarning::SkippedExport ))
			.collect::<Vec<_>>();
		let version = discovery.metadata.version.clone();
		let components = discovery.components.clone();

		let module = PluginModule::new( self.registry.next_module_id(), loaded, discovery, file_name.clone() );
		let module_id = module.id();
		let outcome = self.registry.put( module )?;

		Ok(( UploadReceipt { module_id, identity, version, file_name, components, replaced: outcome.replaced }, warnings ))

	}

}

fn enter( stage: UploadStage ) {
	debug!( stage = %stage, "upload stage" );
}

/// Enters `stage` unless the caller has cancelled.
fn checkpoint( cancel: &CancelToken, stage: UploadStage ) -> Result<(), UploadError> {
	if cancel.is_cancelled() { return Err( UploadError::Cancelled { stage }); }
	enter( stage );
	Ok(())
}

#[cfg( test )]
mod tests {

	use std::time::{ Duration, Instant };
	use super::{ IdentityLocks, UploadError, UploadStage };
	use crate::CancelToken ;

	#[test]
	fn queued_upload_leaves_when_cancelled() {

		let locks = IdentityLocks::default();
		let holder = locks.lock( "Contested", &CancelToken::new() ).expect( "First lock failed" );
		let cancel = CancelToken::new();

		let started = Instant::now();
		let waited = std::thread::scope(| scope | {
			let waiter = scope.spawn(|| locks.lock( "Contested", &cancel ).map(|_| ()));
			std::thread::sleep( Duration::from_millis( 50 ));
			cancel.cancel();
			waiter.join().expect( "waiter panicked" )
		});

		match waited {
			Err( UploadError::Cancelled { stage: UploadStage::Committing }) => {}
			value => panic!( "Expected Err( Cancelled ), found: {:#?}", value ),
		}
		assert!( started.elapsed() < Duration::from_secs( 5 ));
		drop( holder );

		// The abandoned wait left nothing behind.
		assert!( locks.lock( "Contested", &CancelToken::new() ).is_ok() );

	}

	#[test]
	fn distinct_identities_do_not_wait() {
		let locks = IdentityLocks::default();
		let _first = locks.lock( "First", &CancelToken::new() ).expect( "First lock failed" );
		assert!( locks.lock( "Second", &CancelToken::new() ).is_ok() );
	}

}
