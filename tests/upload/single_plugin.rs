use wasm_ui_host::{ CancelToken, PluginStatus };

#[test]
fn upload_single_plugin() {

	let host = crate::test_host();
	assert_eq!( host.list_loaded().len(), 0 );

	let ( receipt, warnings ) = host
		.upload( crate::test_blazor_plugin().request( "TestBlazorPlugin.wasm" ), &CancelToken::new() )
		.expect( "Upload failed" );
	assert_no_warnings!( warnings );

	assert_eq!( receipt.identity, "TestBlazorPlugin" );
	assert_eq!( receipt.version, "1.0.0" );
	assert_eq!( receipt.file_name, "TestBlazorPlugin.wasm" );
	assert_eq!( receipt.replaced, None );
	assert_eq!(
		receipt.components.iter().map(| component | component.display_name() ).collect::<Vec<_>>(),
		vec![ "test-component", "weather-widget" ],
	);
	assert!( receipt.components.iter().all(| component | component.owner_identity() == "TestBlazorPlugin" ));

	let loaded = host.list_loaded();
	assert_eq!( loaded.len(), 1 );
	assert_eq!( loaded[0].id(), receipt.module_id );
	assert_eq!( loaded[0].status(), PluginStatus::Loaded );
	assert_eq!( loaded[0].author(), "Plugin Team" );
	assert_eq!( loaded[0].description(), "Components used by the host tests" );
	assert!( loaded[0].loaded_at().is_some() );
	assert_eq!( host.live_contexts(), 1 );

}

#[test]
fn listing_reflects_upload() {

	let host = crate::test_host();
	let request = crate::test_blazor_plugin().request( "TestBlazorPlugin.wasm" );
	let size_bytes = request.bytes.len();
	host.upload( request, &CancelToken::new() ).expect( "Upload failed" );

	match host.summaries().as_slice() {
		[ summary ] => {
			assert_eq!( summary.identity, "TestBlazorPlugin" );
			assert_eq!( summary.version, "1.0.0" );
			assert_eq!( summary.status, PluginStatus::Loaded );
			assert_eq!( summary.component_count, 2 );
			assert_eq!( summary.file_name, "TestBlazorPlugin.wasm" );
			assert_eq!( summary.size_bytes, size_bytes );
		},
		other => panic!( "Expected exactly one summary, found: {:#?}", other ),
	}

	let json = serde_json::to_value( host.summaries() ).expect( "Listing failed to serialise" );
	assert_eq!( json[0][ "fileName" ], "TestBlazorPlugin.wasm" );
	assert_eq!( json[0][ "sizeBytes" ], size_bytes );

}

#[test]
fn optional_metadata_defaults_to_empty() {

	let host = crate::test_host();
	host.upload( crate::PluginFixture::new( "Bare", "0.1.0" ).component( "bare", "<p/>" ).request( "bare.wasm" ), &CancelToken::new() )
		.expect( "Upload failed" );

	let module = host.registry().get( "Bare" ).expect( "Plugin missing from registry" );
	assert_eq!( module.author(), "" );
	assert_eq!( module.description(), "" );

}
