use serial_halfduplex::{HalfDuplex, ResponseMatcher, SerialError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test(start_paused = true)]
async fn bytes_with_no_command_in_flight_surface_verbatim() {
    let (engine_io, mut device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io).spawn();
    let mut unexpected = handle.subscribe_unexpected();

    device.write_all(b"NOISE").await.unwrap();

    let stray = unexpected.recv().await.unwrap();
    assert_eq!(stray, b"NOISE".to_vec());
}

#[tokio::test(start_paused = true)]
async fn shutdown_settles_queued_commands_as_closed() {
    let (engine_io, device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io).spawn();

    handle.shutdown().await;

    let err = handle
        .issue(b"Q".to_vec(), ResponseMatcher::fixed_length(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SerialError::ConnectionClosed));

    drop(device);
}

#[tokio::test(start_paused = true)]
async fn device_hangup_fails_the_in_flight_command() {
    let (engine_io, mut device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io).spawn();

    let pending = handle
        .submit(b"S".to_vec(), ResponseMatcher::fixed_length(8))
        .await
        .unwrap();

    // Hang up once the command has actually been written.
    let mut buf = [0u8; 16];
    device.read(&mut buf).await.unwrap();
    drop(device);

    let err = pending.wait().await.unwrap_err();
    assert!(matches!(err, SerialError::ConnectionClosed));
}
