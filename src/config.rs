//! Host configuration.
//!
//! Every field has a default, so a config file only needs to mention what it
//! changes. Durations are stored in milliseconds to keep the TOML flat.

use std::time::Duration ;
use pipe_trait::Pipe ;
use serde::Deserialize ;
use thiserror::Error ;



/// Errors produced while reading a [`HostConfig`] from text.
#[derive( Debug, Error )]
pub enum ConfigError {
    /// The input is not valid TOML or a field has the wrong type.
    #[error( "Invalid config: {0}" )] Parse( #[from] toml::de::Error ),
    /// A field parsed but its value cannot work (e.g. a zero tick interval).
    #[error( "Invalid value for `{field}`: {reason}" )] InvalidValue { field: &'static str, reason: String },
}

/// Limits and timeouts applied by the plugin host.
///
/// ```
/// use wasm_ui_host::HostConfig ;
///
/// let config = HostConfig::from_toml_str( r#"
///     max_upload_bytes = 1048576
///     load_timeout_ms = 250
/// "# ).unwrap();
/// assert_eq!( config.max_upload_bytes, 1_048_576 );
/// assert_eq!( config.render_timeout_ms, HostConfig::default().render_timeout_ms );
/// ```
#[derive( Debug, Clone, PartialEq, Eq, Deserialize )]
#[serde( default, deny_unknown_fields )]
pub struct HostConfig {
    /// Uploads larger than this are rejected before any parsing happens.
    pub max_upload_bytes: usize,
    /// Content types an upload may declare. An upload without a declared type is accepted.
    pub accepted_content_types: Vec<String>,
    /// Upper bound for instantiating a component, including its start function.
    pub load_timeout_ms: u64,
    /// Upper bound for a single call into a loaded component (metadata reads and renders).
    pub render_timeout_ms: u64,
    /// Linear memory ceiling per execution context.
    pub max_memory_bytes: usize,
    /// How often the engine epoch advances. Timeouts and cancellation are
    /// observed at this granularity.
    pub epoch_tick_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 16 * 1024 * 1024,
            accepted_content_types: vec![
                "application/wasm".to_string(),
                "application/octet-stream".to_string(),
            ],
            load_timeout_ms: 5_000,
            render_timeout_ms: 1_000,
            max_memory_bytes: 64 * 1024 * 1024,
            epoch_tick_ms: 5,
        }
    }
}

impl HostConfig {

    /// Parses a config from TOML, filling missing fields with defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown fields and
    /// [`ConfigError::InvalidValue`] for values the host cannot run with.
    pub fn from_toml_str( source: &str ) -> Result<Self, ConfigError> {
        toml::from_str::<Self>( source )?.pipe( Self::checked )
    }

    /// Rejects values that would make the host unusable.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn checked( self ) -> Result<Self, ConfigError> {
        if self.epoch_tick_ms == 0 {
            return Err( ConfigError::InvalidValue { field: "epoch_tick_ms", reason: "must be at least 1".to_string() });
        }
        if self.max_upload_bytes == 0 {
            return Err( ConfigError::InvalidValue { field: "max_upload_bytes", reason: "must be at least 1".to_string() });
        }
        Ok( self )
    }

    /// Sets the upload size bound.
    pub fn with_max_upload_bytes( mut self, bytes: usize ) -> Self {
        self.max_upload_bytes = bytes ;
        self
    }

    /// Sets the instantiation timeout.
    pub fn with_load_timeout( mut self, timeout: Duration ) -> Self {
        self.load_timeout_ms = duration_ms( timeout );
        self
    }

    /// Sets the per-call timeout used for metadata reads and renders.
    pub fn with_render_timeout( mut self, timeout: Duration ) -> Self {
        self.render_timeout_ms = duration_ms( timeout );
        self
    }

    /// Sets the linear memory ceiling per execution context.
    pub fn with_max_memory_bytes( mut self, bytes: usize ) -> Self {
        self.max_memory_bytes = bytes ;
        self
    }

    /// Sets the epoch tick interval. Values below one millisecond are rounded up.
    pub fn with_epoch_tick( mut self, tick: Duration ) -> Self {
        self.epoch_tick_ms = duration_ms( tick ).max( 1 );
        self
    }

    #[inline] pub fn load_timeout( &self ) -> Duration { Duration::from_millis( self.load_timeout_ms )}
    #[inline] pub fn render_timeout( &self ) -> Duration { Duration::from_millis( self.render_timeout_ms )}
    #[inline] pub fn epoch_tick( &self ) -> Duration { Duration::from_millis( self.epoch_tick_ms )}

}

fn duration_ms( duration: Duration ) -> u64 {
    u64::try_from( duration.as_millis() ).unwrap_or( u64::MAX )
}
