//! Component discovery.
//!
//! A plugin describes itself through two capabilities, both checked by
//! interface satisfaction rather than by naming conventions:
//!
//! - **Metadata descriptor**: an exported instance named [`METADATA_INTERFACE`]
//! 	with `name` and `version` (required) and `author` and `description`
//! 	(optional), each a `func() -> string`.
//!
//! - **Renderable component**: any other exported instance that exports
//! 	[`RENDER_FUNCTION`] as a `func() -> string`. The returned string is the
//! 	component's markup.
//!
//! Components are reported in the order the component declares its exports,
//! so reloading an identical binary yields an identical list.

use std::time::Duration ;
use itertools::Itertools ;
use serde::Serialize ;
use thiserror::Error ;
use tracing::debug ;
use wasmtime::Engine ;
use wasmtime::component::types::{ ComponentItem, Type };

use crate::context::DispatchError ;
use crate::loader::LoadedModule ;



/// Export name of the metadata descriptor instance.
pub const METADATA_INTERFACE: &str = "ui:plugin/metadata" ;

/// Function a renderable component instance must export.
pub const RENDER_FUNCTION: &str = "render" ;

pub(crate) const REQUIRED_METADATA: [&str; 2] = [ "name", "version" ];
const OPTIONAL_METADATA: [&str; 2] = [ "author", "description" ];

/// Errors raised while reading what a loaded component exposes.
#[derive( Debug, Error )]
pub enum DiscoveryError {
	/// Calling one of the metadata functions failed.
	#[error( "Failed to read metadata `{field}`: {source}" )]
	Metadata { field: &'static str, source: DispatchError },
	/// The component declared a blank name, so it has no identity.
	#[error( "Plugin name is empty" )] EmptyIdentity,
}

/// Free-text metadata a plugin supplies about itself.
#[derive( Debug, Clone, PartialEq, Eq, Serialize )]
pub struct PluginMetadata {
	/// Declared name, used as the plugin identity.
	pub name: String,
	pub version: String,
	pub author: String,
	pub description: String,
}

/// One renderable UI unit exposed by a plugin.
#[derive( Debug, Clone, PartialEq, Eq, Hash, Serialize )]
pub struct ComponentDescriptor {
	display_name: String,
	qualified_type_ref: String,
	owner_identity: String,
}

impl ComponentDescriptor {

	pub(crate) fn new( qualified_type_ref: &str, owner_identity: &str ) -> Self {
		Self {
			display_name: display_name_of( qualified_type_ref ).to_string(),
			qualified_type_ref: qualified_type_ref.to_string(),
			owner_identity: owner_identity.to_string(),
		}
	}

	/// Name the host UI uses to ask for this component.
	#[inline] pub fn display_name( &self ) -> &str { &self.display_name }

	/// Export path of the component instance (e.g. `ui:components/weather-widget`).
	#[inline] pub fn qualified_type_ref( &self ) -> &str { &self.qualified_type_ref }

	/// Identity of the plugin that exposes this component. Lookup only.
	#[inline] pub fn owner_identity( &self ) -> &str { &self.owner_identity }

}

/// Everything discovered about a loaded plugin.
#[derive( Debug, Clone )]
pub struct Discovery {
	pub metadata: PluginMetadata,
	pub components: Vec<ComponentDescriptor>,
	/// Exported instances that were not renderable.
	pub skipped: Vec<String>,
}

/// Reads metadata and enumerates renderable components of loaded plugins.
#[derive( Clone )]
pub struct ComponentDiscoverer {
	engine: Engine,
	call_timeout: Duration,
}

impl ComponentDiscoverer {

	pub fn new( engine: Engine, call_timeout: Duration ) -> Self {
		Self { engine, call_timeout }
	}

	/// Discovers the metadata and the renderable components of `loaded`.
	///
	/// A plugin without components is valid; its component list is empty.
	///
	/// # Errors
	/// Returns [`DiscoveryError`] if a metadata function cannot be called or the
	/// declared name is blank.
	pub fn discover( &self, loaded: &mut LoadedModule ) -> Result<Discovery, DiscoveryError> {

		let metadata = self.read_metadata( loaded )?;

		let component_type = loaded.component.component_type();
		let ( components, skipped ) = component_type.exports( &self.engine )
			.filter(|( name, _ )| *name != METADATA_INTERFACE )
			.filter_map(|( name, item )| match item {
				ComponentItem::ComponentInstance( instance ) => Some( match instance.get_export( &self.engine, RENDER_FUNCTION ) {
					Some( render ) if is_string_getter( &render ) => Ok( ComponentDescriptor::new( name, &metadata.name )),
					_ => Err( name.to_string() ),
				}),
				_ => None,
			})
			.partition_result::<Vec<_>, Vec<_>, _, _>();

		debug!(
			identity = %metadata.name,
			components = %components.iter().map( ComponentDescriptor::display_name ).join( ", " ),
			skipped = skipped.len(),
			"discovered plugin components"
		);

		Ok( Discovery { metadata, components, skipped })

	}

	fn read_metadata( &self, loaded: &mut LoadedModule ) -> Result<PluginMetadata, DiscoveryError> {

		let metadata_type = match loaded.component.component_type().get_export( &self.engine, METADATA_INTERFACE ) {
			Some( ComponentItem::ComponentInstance( instance )) => Some( instance ),
			_ => None,
		};
		let exports_getter = | field: &str | metadata_type.as_ref()
			.and_then(| instance | instance.get_export( &self.engine, field ))
			.is_some_and(| item | is_string_getter( &item ));

		let mut read = | field: &'static str | loaded.context
			.call_string( METADATA_INTERFACE, field, self.call_timeout )
			.map_err(| source | DiscoveryError::Metadata { field, source });

		let [ name, version ] = REQUIRED_METADATA ;
		let [ author, description ] = OPTIONAL_METADATA ;

		let name = read( name )?.trim().to_string();
		if name.is_empty() { return Err( DiscoveryError::EmptyIdentity ); }

		Ok( PluginMetadata {
			name,
			version: read( version )?,
			author: match exports_getter( author ) { true => read( author )?, false => String::new() },
			description: match exports_getter( description ) { true => read( description )?, false => String::new() },
		})

	}

}

/// Whether `item` is a function taking nothing and returning a string.
pub(crate) fn is_string_getter( item: &ComponentItem ) -> bool {
	match item {
		ComponentItem::ComponentFunc( func ) =>
			func.params().next().is_none()
			&& matches!( func.results().collect::<Vec<_>>().as_slice(), [ Type::String ]),
		_ => false,
	}
}

/// `ui:components/weather-widget@1.0.0` → `weather-widget`
fn display_name_of( export_name: &str ) -> &str {
	let unversioned = export_name.split_once( '@' ).map_or( export_name, |( name, _ )| name );
	unversioned.rsplit_once( '/' ).map_or( unversioned, |( _, interface )| interface )
}
