use wasm_ui_host::{ CancelToken, UploadWarning };

#[test]
fn plugin_without_components_is_inert() {

	let host = crate::test_host();
	let ( receipt, warnings ) = host
		.upload( crate::PluginFixture::new( "Inert", "1.0.0" ).request( "inert.wasm" ), &CancelToken::new() )
		.expect( "Upload failed" );

	assert!( receipt.components.is_empty() );
	assert_eq!( warnings, vec![ UploadWarning::NoComponents ]);
	assert_eq!( host.list_loaded().len(), 1 );

}

#[test]
fn non_renderable_exports_are_skipped() {

	let host = crate::test_host();
	let ( receipt, warnings ) = host
		.upload(
			crate::PluginFixture::new( "Mixed", "1.0.0" )
				.component( "good", "<p>good</p>" )
				.non_renderable( "broken" )
				.request( "mixed.wasm" ),
			&CancelToken::new(),
		)
		.expect( "Upload failed" );

	assert_eq!( receipt.components.len(), 1 );
	assert_eq!( receipt.components[0].display_name(), "good" );
	assert_eq!( warnings, vec![ UploadWarning::SkippedExport( "ui:components/broken".to_string() )]);
	assert!( host.registry().lookup_component( "broken" ).is_none() );

}
