use std::path::PathBuf ;
use wasm_ui_host::{ CancelToken, HostConfig, PluginHost, UploadRequest };

/// Uploads every component file given on the command line, then prints the
/// listing as JSON.
///
/// `wasm-ui-host [--config host.toml] <plugin.wasm>...`
fn main() {

	tracing_subscriber::fmt::init();

	if let Err( e ) = run( std::env::args().skip( 1 ).collect()) {
		eprintln!( "{}", e );
		std::process::exit( 1 );
	};

}

fn run( mut args: Vec<String> ) -> Result<(), Box<dyn std::error::Error>> {

	let config = match args.first().map( String::as_str ) {
		Some( "--config" ) => {
			let path = args.get( 1 ).ok_or( "--config needs a path" )?.clone();
			args.drain( ..2 );
			HostConfig::from_toml_str( &std::fs::read_to_string( path )?)?
		},
		_ => HostConfig::default(),
	};

	let host = PluginHost::new( config )?;
	let cancel = CancelToken::new();

	for path in args.into_iter().map( PathBuf::from ) {
		let file_name = path.file_name().map_or_else(|| path.display().to_string(), | name | name.to_string_lossy().into_owned() );
		let request = UploadRequest::new( file_name, std::fs::read( &path )?).with_content_type( "application/wasm" );
		println!( "{}", serde_json::to_string( &host.upload_outcome( request, &cancel ))?);
	}

	println!( "{}", serde_json::to_string_pretty( &host.summaries() )?);
	Ok(())

}
