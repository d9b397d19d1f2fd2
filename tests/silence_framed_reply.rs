use std::time::Duration;

use serial_halfduplex::{HalfDuplex, ResponseMatcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn silence_framed_reply_settles_after_gap() {
    let (engine_io, mut device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io).spawn();

    let device_task = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"Q");
        device.write_all(b"MS2").await.unwrap();
        // Then the device goes quiet; the 300 ms gap frames the reply.
        device
    });

    let start = Instant::now();
    let reply = handle
        .issue(
            b"Q".to_vec(),
            ResponseMatcher::silence_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap();
    assert_eq!(reply, b"MS2".to_vec());
    assert!(
        start.elapsed() >= Duration::from_millis(300),
        "reply settled before the silence gap elapsed"
    );

    let _device = device_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn trickled_bytes_hold_the_reply_open() {
    let (engine_io, mut device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io)
        .command_timeout(Duration::from_secs(5))
        .spawn();

    let device_task = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        device.read(&mut buf).await.unwrap();
        // Five bytes spaced 100 ms apart, all inside the 300 ms gap.
        for b in b"12345" {
            device.write_all(&[*b]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        device
    });

    let start = Instant::now();
    let reply = handle
        .issue(
            b"S".to_vec(),
            ResponseMatcher::silence_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap();
    assert_eq!(reply, b"12345".to_vec());
    // Last byte lands at ~400 ms, the gap runs from there.
    assert!(start.elapsed() >= Duration::from_millis(700));

    let _device = device_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn silent_device_yields_empty_silence_framed_reply() {
    let (engine_io, device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io).spawn();

    let reply = handle
        .issue(
            b"L".to_vec(),
            ResponseMatcher::silence_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap();
    assert!(reply.is_empty(), "no data at all is a valid, empty reply");

    drop(device);
}

#[tokio::test(start_paused = true)]
async fn size_cap_settles_before_the_gap() {
    let (engine_io, mut device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io).spawn();

    let device_task = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        device.read(&mut buf).await.unwrap();
        device.write_all(b"abcd").await.unwrap();
        device
    });

    let start = Instant::now();
    let reply = handle
        .issue(
            b"T".to_vec(),
            ResponseMatcher::silence_timeout_capped(Duration::from_millis(300), 4),
        )
        .await
        .unwrap();
    assert_eq!(reply, b"abcd".to_vec());
    assert!(
        start.elapsed() < Duration::from_millis(300),
        "a full buffer should not wait out the gap"
    );

    let _device = device_task.await.unwrap();
}
