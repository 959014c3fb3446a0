use wasm_ui_host::{ CancelToken, PluginStatus, RegistryError };

#[test]
fn mark_unloaded_is_busy_while_leased() {

	let host = crate::test_host();
	host.upload( crate::test_blazor_plugin().request( "TestBlazorPlugin.wasm" ), &CancelToken::new() )
		.expect( "Upload failed" );

	let first = host.registry().acquire( "TestBlazorPlugin" ).expect( "Acquire failed" );
	let second = host.registry().acquire( "TestBlazorPlugin" ).expect( "Acquire failed" );

	match host.registry().mark_unloaded( "TestBlazorPlugin" ) {
		Err( RegistryError::Busy { identity, holders: 2 }) if identity == "TestBlazorPlugin" => {}
		value => panic!( "Expected Err( Busy ), found: {:#?}", value ),
	}
	// A refused transition changes nothing.
	assert_eq!( host.list_loaded().len(), 1 );
	assert_eq!( first.module().status(), PluginStatus::Loaded );

	drop( first );
	drop( second );

	let module = host.registry().get( "TestBlazorPlugin" ).expect( "Plugin missing from registry" );
	host.registry().mark_unloaded( "TestBlazorPlugin" ).expect( "mark_unloaded failed" );
	assert_eq!( module.status(), PluginStatus::Unloaded );
	assert!( host.list_loaded().is_empty() );
	assert_eq!( host.live_contexts(), 0 );

}

#[test]
fn mark_unloaded_of_unknown_plugin_is_not_found() {

	let host = crate::test_host();
	match host.registry().mark_unloaded( "Nobody" ) {
		Err( RegistryError::NotFound( _ )) => {}
		value => panic!( "Expected Err( NotFound ), found: {:#?}", value ),
	}

}

#[test]
fn collect_retired_is_a_no_op_without_drained_modules() {

	let host = crate::test_host();
	host.upload( crate::test_blazor_plugin().request( "TestBlazorPlugin.wasm" ), &CancelToken::new() )
		.expect( "Upload failed" );
	assert_eq!( host.registry().collect_retired(), 0 );
	assert_eq!( host.list_loaded().len(), 1 );

}
