//! Upload validation.
//!
//! Everything here is pure inspection: a blob is either turned into a compiled
//! [`Component`] that is known to carry the metadata descriptor, or rejected with
//! the first failing check. Nothing is instantiated and nothing touches the registry.

use thiserror::Error ;
use wasmtime::Engine ;
use wasmtime::component::Component ;
use wasmtime::component::types::ComponentItem ;

use crate::HostConfig ;
use crate::discovery::{ METADATA_INTERFACE, REQUIRED_METADATA, is_string_getter };



const WASM_MAGIC: [u8; 4] = *b"\0asm" ;
const COMPONENT_VERSION: [u8; 4] = [ 0x0d, 0x00, 0x01, 0x00 ];
const CORE_MODULE_VERSION: [u8; 4] = [ 0x01, 0x00, 0x00, 0x00 ];

/// Reasons an upload is rejected before any loading is attempted.
///
/// The registry is never touched when one of these is returned.
#[derive( Debug, Error )]
pub enum ValidationError {
	/// The upload contains no bytes.
	#[error( "Upload is empty" )] Empty,
	/// The upload exceeds the configured size bound.
	#[error( "Upload is {size} bytes, the limit is {max} bytes" )] TooLarge { size: usize, max: usize },
	/// The declared content type is not one the host accepts.
	#[error( "Unsupported content type: {0}" )] UnsupportedContentType( String ),
	/// The header is not a WebAssembly header.
	#[error( "Not a WebAssembly binary" )] NotWasm,
	/// The header belongs to a core module rather than a component.
	#[error( "Binary is a core WebAssembly module, expected a component" )] CoreModule,
	/// The header carries a version/layer pair this host does not understand.
	#[error( "Unsupported WebAssembly version {0:02x?}" )] UnsupportedVersion( [u8; 4] ),
	/// The binary failed to compile.
	#[error( "Invalid component: {0}" )] Malformed( wasmtime::Error ),
	/// The component does not export the metadata descriptor.
	#[error( "Component does not export `{}`", METADATA_INTERFACE )] MissingMetadata,
	/// The metadata descriptor is exported but has the wrong shape.
	#[error( "Metadata descriptor is invalid: {0}" )] InvalidMetadata( String ),
}

/// A compiled component that passed every validation check.
///
/// Only the validator constructs this, so holding one is proof the checks ran.
pub struct ValidatedModule {
	pub(crate) component: Component,
	pub(crate) size_bytes: usize,
}

impl ValidatedModule {
	/// Size of the uploaded binary.
	#[inline] pub fn size_bytes( &self ) -> usize { self.size_bytes }
}

impl std::fmt::Debug for ValidatedModule {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "ValidatedModule" )
			.field( "component", &"<Component>" )
			.field( "size_bytes", &self.size_bytes )
			.finish()
	}
}

/// Inspects uploaded blobs.
#[derive( Clone )]
pub struct BinaryValidator {
	engine: Engine,
	max_bytes: usize,
	accepted_content_types: Vec<String>,
}

impl BinaryValidator {

	pub fn new( engine: Engine, config: &HostConfig ) -> Self {
		Self {
			engine,
			max_bytes: config.max_upload_bytes,
			accepted_content_types: config.accepted_content_types.clone(),
		}
	}

	/// Runs the checks in order: size and content type, header, then
	/// compilation and the metadata descriptor.
	///
	/// # Errors
	/// Returns the [`ValidationError`] of the first failing check.
	pub fn validate( &self, blob: &[u8], content_type: Option<&str> ) -> Result<ValidatedModule, ValidationError> {

		check_size( blob, self.max_bytes )?;
		if let Some( content_type ) = content_type {
			let declared = content_type.split( ';' ).next().unwrap_or_default().trim();
			if !self.accepted_content_types.iter().any(| accepted | accepted.eq_ignore_ascii_case( declared )) {
				return Err( ValidationError::UnsupportedContentType( content_type.to_string() ));
			}
		}
		check_header( blob )?;

		let component = Component::from_binary( &self.engine, blob ).map_err( ValidationError::Malformed )?;
		check_metadata_descriptor( &self.engine, &component )?;

		Ok( ValidatedModule { component, size_bytes: blob.len() })

	}

}

fn check_size( blob: &[u8], max: usize ) -> Result<(), ValidationError> {
	match blob.len() {
		0 => Err( ValidationError::Empty ),
		size if size > max => Err( ValidationError::TooLarge { size, max }),
		_ => Ok(()),
	}
}

/// Checks the 8-byte preamble shared by core modules and components.
///
/// # Errors
/// Returns [`ValidationError::NotWasm`], [`ValidationError::CoreModule`] or
/// [`ValidationError::UnsupportedVersion`].
pub fn check_header( blob: &[u8] ) -> Result<(), ValidationError> {
	let ( Some( magic ), Some( version )) = ( blob.get( 0..4 ), blob.get( 4..8 )) else {
		return Err( ValidationError::NotWasm );
	};
	if magic != WASM_MAGIC { return Err( ValidationError::NotWasm ); }
	match version {
		v if v == COMPONENT_VERSION => Ok(()),
		v if v == CORE_MODULE_VERSION => Err( ValidationError::CoreModule ),
		v => Err( ValidationError::UnsupportedVersion([ v[0], v[1], v[2], v[3] ])),
	}
}

fn check_metadata_descriptor( engine: &Engine, component: &Component ) -> Result<(), ValidationError> {

	let metadata = match component.component_type().get_export( engine, METADATA_INTERFACE ) {
		Some( ComponentItem::ComponentInstance( instance )) => instance,
		Some( _ ) => return Err( ValidationError::InvalidMetadata( format!( "`{}` is not an instance", METADATA_INTERFACE ))),
		None => return Err( ValidationError::MissingMetadata ),
	};

	REQUIRED_METADATA.iter().try_for_each(| name | match metadata.get_export( engine, name ) {
		Some( item ) if is_string_getter( &item ) => Ok(()),
		Some( _ ) => Err( ValidationError::InvalidMetadata( format!( "`{}` must be `func() -> string`", name ))),
		None => Err( ValidationError::InvalidMetadata( format!( "missing `{}`", name ))),
	})

}
