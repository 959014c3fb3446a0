//! A runtime host for WebAssembly UI-component plugins.
//!
//! Plugins are WebAssembly components uploaded while the host is running. Each
//! one is validated, instantiated in its own wasmtime store, asked about itself
//! and then registered, after which its components can be rendered by name.
//! Uploading a plugin with a name that is already loaded replaces it without a
//! gap, and a plugin is only released once nothing is rendering it any more.
//!
//! # Core Concepts
//!
//! - **Plugin**: a component binary exporting the metadata instance
//! 	`ui:plugin/metadata` with `name` and `version` (and optionally `author`
//! 	and `description`), each a `func() -> string`. The `name` is the plugin's
//! 	identity.
//!
//! - **Component**: any other exported instance with a `render: func() -> string`
//! 	export. Its display name is the interface part of the export name, so
//! 	`ui:components/weather-widget` renders as `weather-widget`.
//!
//! - [`PluginHost`]: owns the engine, the [`PluginRegistry`] and the pipeline that
//! 	feeds it. Uploads go through [`PluginHost::upload`], renders through
//! 	[`PluginHost::resolve`].
//!
//! - [`ExecutionContext`]: one store plus one instance. Contexts are never shared,
//! 	and dropping one is the only way a plugin's memory is released.
//!
//! - [`Lease`]: a counted reference to a loaded plugin. A [`RenderableHandle`]
//! 	holds one, which keeps its plugin alive across a concurrent replace or unload.
//!
//! # Example
//!
//! ```
//! use wasm_ui_host::{ CancelToken, HostConfig, PluginHost, UploadRequest };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host = PluginHost::new( HostConfig::default() )?;
//!
//! // Strings are returned through a (pointer, length) pair in linear memory.
//! let bytes = wat::parse_str( r#"(component
//! 	(core module $m
//! 		(memory (export "mem") 1)
//! 		(data (i32.const 8) "\40\00\00\00\04\00\00\00")
//! 		(data (i32.const 16) "\44\00\00\00\05\00\00\00")
//! 		(data (i32.const 24) "\49\00\00\00\09\00\00\00")
//! 		(data (i32.const 64) "demo1.0.0<b>hi</b>")
//! 		(func (export "name") (result i32) i32.const 8)
//! 		(func (export "version") (result i32) i32.const 16)
//! 		(func (export "render") (result i32) i32.const 24)
//! 	)
//! 	(core instance $i (instantiate $m))
//! 	(func $name (result string) (canon lift (core func $i "name") (memory (core memory $i "mem"))))
//! 	(func $version (result string) (canon lift (core func $i "version") (memory (core memory $i "mem"))))
//! 	(func $render (result string) (canon lift (core func $i "render") (memory (core memory $i "mem"))))
//! 	(instance $meta (export "name" (func $name)) (export "version" (func $version)))
//! 	(instance $greeting (export "render" (func $render)))
//! 	(export "ui:plugin/metadata" (instance $meta))
//! 	(export "ui:components/greeting" (instance $greeting))
//! )"# )?;
//!
//! let ( receipt, warnings ) = host.upload( UploadRequest::new( "demo.wasm", bytes ), &CancelToken::new() )?;
//! assert_eq!( receipt.identity, "demo" );
//! assert!( warnings.is_empty() );
//!
//! let markup = host.resolve( "greeting" )?.render()?;
//! assert_eq!( markup, "<b>hi</b>" );
//! # Ok(())
//! # }
//! ```
//!
//! # Limits
//!
//! Plugins are untrusted code. Each context gets a linear memory ceiling, every
//! call into a plugin runs under a deadline, and instantiation (including the
//! component's start function) is bounded by the load timeout and can be
//! cancelled with a [`CancelToken`]. Deadlines are enforced with wasmtime epoch
//! interruption, driven by a ticker thread the host owns; see [`HostConfig`].
//!
//! Isolation covers memory and execution only. Plugins are linked against an
//! empty host linker, so a plugin that imports anything fails to load.

mod cancel ;
mod config ;
mod context ;
mod discovery ;
mod epoch ;
mod gateway ;
mod host ;
mod loader ;
mod orchestrator ;
mod registry ;
mod utils ;
mod validator ;

#[doc( no_inline )]
pub use wasmtime::Engine ;

pub use cancel::CancelToken ;
pub use config::{ ConfigError, HostConfig };
pub use context::{ DispatchError, ExecutionContext, Interrupt };
pub use discovery::{ ComponentDescriptor, ComponentDiscoverer, Discovery, DiscoveryError, PluginMetadata, METADATA_INTERFACE, RENDER_FUNCTION };
pub use gateway::{ RenderError, RenderGateway, RenderableHandle };
pub use host::{ HostError, PluginHost };
pub use loader::{ IsolatedLoader, LoadError, LoadedModule };
pub use orchestrator::{ OutcomeStatus, UploadError, UploadOrchestrator, UploadOutcome, UploadReceipt, UploadRequest, UploadStage, UploadWarning };
pub use registry::{ Lease, ModuleId, PluginModule, PluginRegistry, PluginStatus, PluginSummary, PutOutcome, RegistryChanged, RegistryError, UnloadOutcome };
pub use utils::PartialSuccess ;
pub use validator::{ BinaryValidator, ValidatedModule, ValidationError, check_header };
