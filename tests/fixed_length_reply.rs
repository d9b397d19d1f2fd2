use std::time::Duration;

use serial_halfduplex::{HalfDuplex, ResponseMatcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test(start_paused = true)]
async fn fixed_length_reply_across_two_chunks() {
    let (engine_io, mut device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io).spawn();

    let device_task = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"c");
        device.write_all(&[0x01]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        device.write_all(&[0x02]).await.unwrap();
        device
    });

    let reply = handle
        .issue(b"c".to_vec(), ResponseMatcher::fixed_length(2))
        .await
        .unwrap();
    assert_eq!(reply, vec![0x01, 0x02]);

    let _device = device_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn surplus_after_fixed_reply_is_unexpected() {
    let (engine_io, mut device) = tokio::io::duplex(256);
    let handle = HalfDuplex::new(engine_io).spawn();
    let mut unexpected = handle.subscribe_unexpected();

    let device_task = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        device.read(&mut buf).await.unwrap();
        // Reply two bytes longer than the host expects.
        device.write_all(&[0xAA, 0xBB, 0xCC, 0xDD]).await.unwrap();
        device
    });

    let reply = handle
        .issue(b"m".to_vec(), ResponseMatcher::fixed_length(2))
        .await
        .unwrap();
    assert_eq!(reply, vec![0xAA, 0xBB]);

    let stray = unexpected.recv().await.unwrap();
    assert_eq!(stray, vec![0xCC, 0xDD]);

    let _device = device_task.await.unwrap();
}
