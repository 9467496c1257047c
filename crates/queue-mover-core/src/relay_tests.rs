//! Tests for the relay buffer

use super::*;
use tokio::time::Instant;

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_zero_capacity_is_rejected() {
    let result = bounded::<u32>(0);
    assert!(matches!(
        result,
        Err(MoverError::InvalidConfiguration { .. })
    ));
}

#[test]
fn test_new_buffer_is_empty() {
    let (sender, _receiver) = bounded::<u32>(DEFAULT_CAPACITY).unwrap();
    assert!(sender.is_empty());
    assert_eq!(sender.capacity(), 100);
}

// ============================================================================
// Put and Get
// ============================================================================

#[tokio::test]
async fn test_items_come_out_in_fifo_order() {
    let (sender, receiver) = bounded(10).unwrap();
    for i in 0..5 {
        sender.put(i).await.unwrap();
    }
    assert_eq!(sender.len(), 5);

    let mut out = Vec::new();
    for _ in 0..5 {
        out.push(receiver.get(Duration::from_secs(1)).await.unwrap());
    }

    assert_eq!(out, vec![0, 1, 2, 3, 4]);
    assert!(sender.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_get_times_out_on_empty_buffer() {
    let (_sender, receiver) = bounded::<u32>(10).unwrap();
    let start = Instant::now();

    let result = receiver.get(Duration::from_secs(1)).await;

    assert_eq!(result, Err(RelayError::Timeout(Duration::from_secs(1))));
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_get_returns_as_soon_as_an_item_arrives() {
    let (sender, receiver) = bounded(10).unwrap();
    let start = Instant::now();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        sender.put("late").await.unwrap();
        // Keep the sender alive past the get
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let item = receiver.get(Duration::from_secs(5)).await.unwrap();
    assert_eq!(item, "late");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_put_blocks_while_full() {
    let (sender, receiver) = bounded(2).unwrap();
    sender.put(1).await.unwrap();
    sender.put(2).await.unwrap();

    let blocked = sender.clone();
    let handle = tokio::spawn(async move { blocked.put(3).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());
    assert_eq!(sender.len(), 2);

    assert_eq!(receiver.get(Duration::from_secs(1)).await.unwrap(), 1);
    handle.await.unwrap().unwrap();

    assert_eq!(receiver.get(Duration::from_secs(1)).await.unwrap(), 2);
    assert_eq!(receiver.get(Duration::from_secs(1)).await.unwrap(), 3);
}

#[tokio::test]
async fn test_try_get_does_not_wait() {
    let (sender, receiver) = bounded(4).unwrap();
    assert_eq!(receiver.try_get().await, None);

    sender.put(7).await.unwrap();
    assert_eq!(receiver.try_get().await, Some(7));
    assert_eq!(receiver.try_get().await, None);
}

// ============================================================================
// Closing
// ============================================================================

#[tokio::test]
async fn test_get_drains_before_reporting_closed() {
    let (sender, receiver) = bounded(4).unwrap();
    sender.put(1).await.unwrap();
    sender.put(2).await.unwrap();
    drop(sender);

    assert_eq!(receiver.get(Duration::from_secs(1)).await, Ok(1));
    assert_eq!(receiver.get(Duration::from_secs(1)).await, Ok(2));
    assert_eq!(
        receiver.get(Duration::from_secs(1)).await,
        Err(RelayError::Closed)
    );
}

#[tokio::test]
async fn test_closed_only_after_last_sender_drops() {
    let (sender, receiver) = bounded::<u32>(4).unwrap();
    let second = sender.clone();
    drop(sender);

    assert_eq!(receiver.try_get().await, None);
    second.put(9).await.unwrap();
    drop(second);

    assert_eq!(receiver.get(Duration::from_secs(1)).await, Ok(9));
    assert_eq!(
        receiver.get(Duration::from_secs(1)).await,
        Err(RelayError::Closed)
    );
}

#[tokio::test]
async fn test_put_fails_and_returns_item_without_receivers() {
    let (sender, receiver) = bounded(4).unwrap();
    drop(receiver);

    assert!(sender.is_closed());
    let RelayClosed(item) = sender.put("orphan").await.unwrap_err();
    assert_eq!(item, "orphan");
}

#[tokio::test(start_paused = true)]
async fn test_blocked_put_fails_when_receiver_drops() {
    let (sender, receiver) = bounded(1).unwrap();
    sender.put(1).await.unwrap();

    let handle = tokio::spawn(async move { sender.put(2).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(receiver);

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(RelayClosed(2))));
}

// ============================================================================
// Multiple Consumers
// ============================================================================

#[tokio::test]
async fn test_consumers_share_items_without_duplication() {
    let (sender, receiver) = bounded(64).unwrap();
    for i in 0..50u32 {
        sender.put(i).await.unwrap();
    }
    drop(sender);

    let mut handles = Vec::new();
    for _ in 0..3 {
        let consumer = receiver.clone();
        handles.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Ok(item) = consumer.get(Duration::from_secs(1)).await {
                taken.push(item);
            }
            taken
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort_unstable();

    assert_eq!(all, (0..50).collect::<Vec<_>>());
}
