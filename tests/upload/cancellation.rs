use std::time::Duration ;
use wasm_ui_host::{ CancelToken, HostConfig, LoadError, PluginStatus, UploadError, UploadStage };
use crate::StartBehaviour ;

#[test]
fn cancelled_before_start() {

	let host = crate::test_host();
	let cancel = CancelToken::new();
	cancel.cancel();

	match host.upload( crate::test_blazor_plugin().request( "TestBlazorPlugin.wasm" ), &cancel ) {
		Err( UploadError::Cancelled { stage: UploadStage::Validating }) => {}
		value => panic!( "Expected Err( Cancelled ), found: {:#?}", value ),
	}
	assert!( host.list_loaded().is_empty() );

}

#[test]
fn cancel_interrupts_loading() {

	// A long load timeout so only the cancellation can end the start function.
	let host = wasm_ui_host::PluginHost::new( HostConfig::default()
		.with_load_timeout( Duration::from_secs( 60 ))
		.with_epoch_tick( Duration::from_millis( 1 ))
	).expect( "Failed to start host" );
	let cancel = CancelToken::new();

	let canceller = {
		let cancel = cancel.clone();
		std::thread::spawn( move || {
			std::thread::sleep( Duration::from_millis( 50 ));
			cancel.cancel();
		})
	};

	let request = crate::PluginFixture::new( "Spinning", "1.0.0" )
		.with_start( StartBehaviour::Spin )
		.request( "spinning.wasm" );
	match host.upload( request, &cancel ) {
		Err( UploadError::Load( LoadError::Cancelled )) => {}
		value => panic!( "Expected Err( Cancelled ), found: {:#?}", value ),
	}

	canceller.join().expect( "canceller panicked" );
	assert!( host.list_loaded().is_empty() );
	assert_eq!( host.live_contexts(), 0 );

}

#[test]
fn cancel_after_commit_began_is_ignored() {

	let host = crate::test_host();
	let events = host.subscribe();
	let cancel = CancelToken::new();

	// The `Loaded` notification is published from inside the commit, so the
	// cancel below always lands after `Committing` has begun.
	let canceller = {
		let cancel = cancel.clone();
		std::thread::spawn( move || {
			let event = events.recv().expect( "No notification" );
			cancel.cancel();
			event
		})
	};

	let result = host.upload( crate::test_blazor_plugin().request( "TestBlazorPlugin.wasm" ), &cancel );
	let event = canceller.join().expect( "canceller panicked" );

	match result {
		Ok(( receipt, _ )) if receipt.module_id == event.module_id => {}
		value => panic!( "Expected Ok( receipt ), found: {:#?}", value ),
	}
	assert!( cancel.is_cancelled() );
	assert_eq!( event.status, PluginStatus::Loaded );
	match host.registry().get( "TestBlazorPlugin" ) {
		Some( module ) if module.status() == PluginStatus::Loaded => {}
		value => panic!( "Expected a loaded module, found: {:#?}", value ),
	}
	assert_eq!( host.live_contexts(), 1 );

}
