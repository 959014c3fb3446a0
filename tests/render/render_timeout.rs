use wasm_ui_host::{ CancelToken, DispatchError, Interrupt, RenderError };

#[test]
fn endless_render_times_out() {

	let host = crate::test_host();
	host.upload( crate::PluginFixture::new( "Stuck", "1.0.0" ).spinning_component( "stuck-widget" ).request( "stuck.wasm" ), &CancelToken::new() )
		.expect( "Upload failed" );
	host.upload( crate::PluginFixture::new( "Healthy", "1.0.0" ).component( "fine-widget", "<p>fine</p>" ).request( "healthy.wasm" ), &CancelToken::new() )
		.expect( "Upload failed" );

	match host.gateway().render( "stuck-widget" ) {
		Err( RenderError::Invocation { component, source: DispatchError::Interrupted( Interrupt::TimedOut ) }) if component == "stuck-widget" => {}
		value => panic!( "Expected Err( Interrupted( TimedOut )), found: {:#?}", value ),
	}

	// Other plugins live in their own contexts and are unaffected.
	match host.gateway().render( "fine-widget" ) {
		Ok( markup ) if markup == "<p>fine</p>" => {}
		value => panic!( "Expected Ok( \"<p>fine</p>\" ), found: {:#?}", value ),
	}

}

#[test]
fn timed_out_plugin_can_still_be_unloaded() {

	let host = crate::test_host();
	host.upload( crate::PluginFixture::new( "Stuck", "1.0.0" ).spinning_component( "stuck-widget" ).request( "stuck.wasm" ), &CancelToken::new() )
		.expect( "Upload failed" );

	assert!( host.gateway().render( "stuck-widget" ).is_err() );
	host.unload( "Stuck" ).expect( "Unload failed" );
	assert_eq!( host.live_contexts(), 0 );

}
