// Builds plugin components from WAT so every test can describe exactly the
// plugin it needs. Strings are placed in linear memory and returned through a
// (pointer, length) pair, which is how `func() -> string` is lifted.

#[allow( dead_code )]
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum StartBehaviour { Trap, Spin }

#[allow( dead_code )]
#[derive( Debug, Clone )]
pub struct PluginFixture {
	name: String,
	version: Option<String>,
	author: Option<String>,
	description: Option<String>,
	metadata: bool,
	spinning_metadata: bool,
	components: Vec<( String, String )>,
	spinning_components: Vec<String>,
	non_renderable: Vec<String>,
	imports: bool,
	start: Option<StartBehaviour>,
}

#[allow( dead_code )]
impl PluginFixture {

	pub fn new( name: &str, version: &str ) -> Self {
		Self {
			name: name.to_string(),
			version: Some( version.to_string() ),
			author: None,
			description: None,
			metadata: true,
			spinning_metadata: false,
			components: Vec::new(),
			spinning_components: Vec::new(),
			non_renderable: Vec::new(),
			imports: false,
			start: None,
		}
	}

	pub fn author( mut self, author: &str ) -> Self { self.author = Some( author.to_string() ); self }
	pub fn description( mut self, description: &str ) -> Self { self.description = Some( description.to_string() ); self }
	pub fn without_metadata( mut self ) -> Self { self.metadata = false ; self }
	pub fn without_version( mut self ) -> Self { self.version = None ; self }
	/// Makes the metadata `name` function loop forever.
	pub fn spinning_metadata( mut self ) -> Self { self.spinning_metadata = true ; self }
	pub fn with_missing_import( mut self ) -> Self { self.imports = true ; self }
	pub fn with_start( mut self, start: StartBehaviour ) -> Self { self.start = Some( start ); self }

	/// Adds `ui:components/<name>` rendering `markup`.
	pub fn component( mut self, name: &str, markup: &str ) -> Self {
		self.components.push(( name.to_string(), markup.to_string() ));
		self
	}

	/// Adds `ui:components/<name>` whose `render` never returns.
	pub fn spinning_component( mut self, name: &str ) -> Self {
		self.spinning_components.push( name.to_string() );
		self
	}

	/// Adds `ui:components/<name>` exporting `draw` instead of `render`.
	pub fn non_renderable( mut self, name: &str ) -> Self {
		self.non_renderable.push( name.to_string() );
		self
	}

	pub fn wat( &self ) -> String {

		let mut strings = vec![ self.name.clone() ];
		let version = self.version.as_ref().map(| version | push( &mut strings, version ));
		let author = self.author.as_ref().map(| author | push( &mut strings, author ));
		let description = self.description.as_ref().map(| description | push( &mut strings, description ));
		let markups = self.components.iter().map(|( _, markup )| push( &mut strings, markup )).collect::<Vec<_>>();

		let mut core = String::from( "\t(core module $m\n" );
		if self.imports { core += "\t\t(import \"host\" \"ping\" (func))\n"; }
		core += "\t\t(memory (export \"mem\") 1)\n";
		let mut offset = 1024 ;
		for ( index, value ) in strings.iter().enumerate() {
			let slot = 8 * ( index + 1 );
			core += &format!( "\t\t(data (i32.const {}) \"{}{}\")\n", slot, hex( offset as u32 ), hex( value.len() as u32 ));
			core += &format!( "\t\t(data (i32.const {}) \"{}\")\n", offset, escape( value.as_bytes() ));
			core += &format!( "\t\t(func (export \"f{}\") (result i32) i32.const {})\n", index, slot );
			offset += value.len().max( 1 );
		}
		core += "\t\t(func (export \"spin\") (result i32) (loop $l (br $l)) i32.const 0)\n";
		match self.start {
			Some( StartBehaviour::Trap ) => core += "\t\t(func $start unreachable)\n\t\t(start $start)\n",
			Some( StartBehaviour::Spin ) => core += "\t\t(func $start (loop $l (br $l)))\n\t\t(start $start)\n",
			None => {},
		}
		core += "\t)\n";

		let mut wat = String::from( "(component\n" );
		if self.imports {
			wat += "\t(import \"host:missing/api\" (instance $host (export \"ping\" (func))))\n";
			wat += "\t(core func $ping (canon lower (func $host \"ping\")))\n";
			wat += "\t(core instance $host_core (export \"ping\" (func $ping)))\n";
			wat += &core ;
			wat += "\t(core instance $i (instantiate $m (with \"host\" (instance $host_core))))\n";
		} else {
			wat += &core ;
			wat += "\t(core instance $i (instantiate $m))\n";
		}
		for index in 0..strings.len() {
			wat += &format!( "\t(func $f{0} (result string) (canon lift (core func $i \"f{0}\") (memory (core memory $i \"mem\"))))\n", index );
		}
		wat += "\t(func $spin (result string) (canon lift (core func $i \"spin\") (memory (core memory $i \"mem\"))))\n";

		if self.metadata {
			let name = match self.spinning_metadata { true => "$spin", false => "$f0" };
			wat += &format!( "\t(instance $meta (export \"name\" (func {}))", name );
			if let Some( index ) = version { wat += &format!( " (export \"version\" (func $f{}))", index ); }
			if let Some( index ) = author { wat += &format!( " (export \"author\" (func $f{}))", index ); }
			if let Some( index ) = description { wat += &format!( " (export \"description\" (func $f{}))", index ); }
			wat += ")\n\t(export \"ui:plugin/metadata\" (instance $meta))\n";
		}
		for (( name, _ ), index ) in self.components.iter().zip( markups ) {
			wat += &format!( "\t(instance $c-{0} (export \"render\" (func $f{1})))\n\t(export \"ui:components/{0}\" (instance $c-{0}))\n", name, index );
		}
		for name in &self.spinning_components {
			wat += &format!( "\t(instance $c-{0} (export \"render\" (func $spin)))\n\t(export \"ui:components/{0}\" (instance $c-{0}))\n", name );
		}
		for name in &self.non_renderable {
			wat += &format!( "\t(instance $c-{0} (export \"draw\" (func $f0)))\n\t(export \"ui:components/{0}\" (instance $c-{0}))\n", name );
		}
		wat += ")\n";
		wat

	}

	pub fn bytes( &self ) -> Vec<u8> {
		wat::parse_str( self.wat() ).unwrap_or_else(| err | panic!( "Fixture failed to assemble: {}\n{}", err, self.wat() ))
	}

	pub fn request( &self, file_name: &str ) -> wasm_ui_host::UploadRequest {
		wasm_ui_host::UploadRequest::new( file_name, self.bytes() ).with_content_type( "application/wasm" )
	}

}

fn push( strings: &mut Vec<String>, value: &str ) -> usize {
	strings.push( value.to_string() );
	strings.len() - 1
}

fn hex( value: u32 ) -> String {
	escape( &value.to_le_bytes() )
}

fn escape( bytes: &[u8] ) -> String {
	bytes.iter().map(| byte | format!( "\\{:02x}", byte )).collect()
}

/// A host with short deadlines so timeout tests finish quickly.
#[allow( dead_code )]
pub fn test_host() -> wasm_ui_host::PluginHost {
	test_host_with( wasm_ui_host::HostConfig::default() )
}

#[allow( dead_code )]
pub fn test_host_with( config: wasm_ui_host::HostConfig ) -> wasm_ui_host::PluginHost {
	wasm_ui_host::PluginHost::new( config
		.with_load_timeout( std::time::Duration::from_millis( 300 ))
		.with_render_timeout( std::time::Duration::from_millis( 300 ))
		.with_epoch_tick( std::time::Duration::from_millis( 1 ))
	).expect( "Failed to start host" )
}

/// The plugin used throughout: `TestBlazorPlugin` v1.0.0 with two components.
#[allow( dead_code )]
pub fn test_blazor_plugin() -> PluginFixture {
	PluginFixture::new( "TestBlazorPlugin", "1.0.0" )
		.author( "Plugin Team" )
		.description( "Components used by the host tests" )
		.component( "test-component", "<div class=\"test\">Hello from plugin</div>" )
		.component( "weather-widget", "<div class=\"weather\">Sunny, 22°C</div>" )
}
