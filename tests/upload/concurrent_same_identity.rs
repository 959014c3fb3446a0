use std::sync::{ Arc, Barrier };
use wasm_ui_host::{ CancelToken, PluginStatus };

const UPLOADERS: usize = 6 ;

#[test]
fn parallel_uploads_of_one_identity() {

	let host = Arc::new( crate::test_host() );
	let barrier = Arc::new( Barrier::new( UPLOADERS ));
	let events = host.subscribe();

	let handles = ( 0..UPLOADERS ).map(| index | {
		let host = Arc::clone( &host );
		let barrier = Arc::clone( &barrier );
		let plugin = crate::PluginFixture::new( "Contested", &format!( "1.0.{}", index ))
			.component( "contested-widget", &format!( "<p>{}</p>", index ));
		std::thread::spawn( move || {
			barrier.wait();
			host.upload( plugin.request( "contested.wasm" ), &CancelToken::new() ).map(|( receipt, _ )| receipt )
		})
	}).collect::<Vec<_>>();

	let receipts = handles.into_iter()
		.map(| handle | handle.join().expect( "upload thread panicked" ).expect( "Upload failed" ))
		.collect::<Vec<_>>();

	let loaded = host.list_loaded();
	assert_eq!( loaded.len(), 1 );
	assert_eq!( loaded[0].status(), PluginStatus::Loaded );
	assert_eq!( host.live_contexts(), 1 );
	assert!( host.registry().list_retiring().is_empty() );

	// Every upload but the first replaced exactly one predecessor.
	assert_eq!( receipts.iter().filter(| receipt | receipt.replaced.is_none() ).count(), 1 );

	let winner = receipts.iter().find(| receipt | receipt.module_id == loaded[0].id() ).expect( "Winner has no receipt" );
	match host.gateway().render( "contested-widget" ) {
		Ok( markup ) if markup == format!( "<p>{}</p>", &winner.version[4..] ) => {}
		value => panic!( "Expected the winner's markup, found: {:#?}", value ),
	}

	let unloaded = events.try_iter().filter(| event | event.status == PluginStatus::Unloaded ).count();
	assert_eq!( unloaded, UPLOADERS - 1 );

}
