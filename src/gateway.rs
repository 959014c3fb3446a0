//! Render resolution.
//!
//! The gateway turns a component name coming from the host UI into a
//! [`RenderableHandle`]. The handle carries a lease on the owning module, so
//! the module cannot be released while the handle exists, even if it gets
//! replaced or unloaded in the meantime.

use std::sync::Arc ;
use std::time::Duration ;
use itertools::Itertools ;
use thiserror::Error ;
use tracing::{ debug, warn };

use crate::context::DispatchError ;
use crate::discovery::{ ComponentDescriptor, RENDER_FUNCTION };
use crate::registry::{ Lease, PluginModule, PluginRegistry };
use crate::utils::PartialSuccess ;



#[derive( Debug, Error )]
pub enum RenderError {
	/// No loaded plugin exposes a component by this name.
	#[error( "Component `{0}` is not available" )] NotFound( String ),
	/// The component was found but calling into it failed.
	#[error( "Component `{component}` failed to render: {source}" )]
	Invocation { component: String, source: DispatchError },
}

/// A resolved component, ready to render.
#[derive( Debug )]
pub struct RenderableHandle {
	descriptor: ComponentDescriptor,
	lease: Lease,
	timeout: Duration,
}

impl RenderableHandle {

	#[inline] pub fn descriptor( &self ) -> &ComponentDescriptor { &self.descriptor }
	/// The module this handle keeps alive.
	#[inline] pub fn module( &self ) -> &Arc<PluginModule> { self.lease.module() }

	/// Calls the component's `render` function and returns its markup.
	///
	/// # Errors
	/// Returns [`RenderError::Invocation`] if the call traps, times out or
	/// returns something other than a string.
	pub fn render( &self ) -> Result<String, RenderError> {
		self.lease.module()
			.with_context(| context | context.call_string(
				self.descriptor.qualified_type_ref(),
				RENDER_FUNCTION,
				self.timeout,
			))
			.map_err(| source | RenderError::Invocation { component: self.descriptor.display_name().to_string(), source })
	}

}

/// Resolves component names to renderable handles.
#[derive( Debug, Clone )]
pub struct RenderGateway {
	registry: Arc<PluginRegistry>,
	timeout: Duration,
}

impl RenderGateway {

	pub fn new( registry: Arc<PluginRegistry>, timeout: Duration ) -> Self {
		Self { registry, timeout }
	}

	/// Resolves `name` (display name or qualified reference) to a handle.
	///
	/// # Errors
	/// Returns [`RenderError::NotFound`] if no `Loaded` plugin exposes it.
	pub fn resolve( &self, name: &str ) -> Result<RenderableHandle, RenderError> {
		let ( lease, descriptor ) = self.registry.acquire_component( name )
			.ok_or_else(|| RenderError::NotFound( name.to_string() ))?;
		debug!( component = name, module_id = %lease.module().id(), "component resolved" );
		Ok( RenderableHandle { descriptor, lease, timeout: self.timeout })
	}

	/// Resolves and renders one component.
	///
	/// # Errors
	/// See [`resolve`]( Self::resolve ) and [`RenderableHandle::render`].
	pub fn render( &self, name: &str ) -> Result<String, RenderError> {
		self.resolve( name )?.render()
	}

	/// Renders every component in `names`, in order.
	///
	/// A component that cannot be found or fails to render is left out of the
	/// page and reported next to it instead.
	pub fn render_page<'a>( &self, names: impl IntoIterator<Item = &'a str> ) -> PartialSuccess<Vec<( String, String )>, RenderError> {
		let ( rendered, omitted ) = names.into_iter()
			.map(| name | self.render( name ).map(| markup | ( name.to_string(), markup )))
			.partition_result::<Vec<_>, Vec<_>, _, _>();
		omitted.iter().for_each(| err | warn!( error = %err, "component omitted from page" ));
		( rendered, omitted )
	}

}
