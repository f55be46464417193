mod common;

use common::Harness;
use loan_approval::application::commands::SkipReason;
use loan_approval::application::scheduler::ChainScheduler;
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn test_scan_builds_chains_for_eligible_loans() {
    let h = Harness::three_levels().await;
    h.add_loan(1, dec!(20000)).await;

    let mut orphan = common::loan(2, dec!(100));
    orphan.product_id = 9;
    h.ledger.add_loan(orphan).await;

    let mut inactive = common::loan(3, dec!(100));
    inactive.approval_schedule_active = false;
    h.ledger.add_loan(inactive).await;

    let scheduler = ChainScheduler::new(h.engine.clone());
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.created, vec![1]);
    assert_eq!(report.skipped, vec![(2, SkipReason::NoTemplate)]);
    assert!(report.failed.is_empty());
    assert_eq!(h.steps(1).await.len(), 3);
    assert!(h.steps(3).await.is_empty());

    // Skipped loans come back on the next scan, built ones do not.
    let report = scheduler.run_once().await.unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.skipped, vec![(2, SkipReason::NoTemplate)]);
}

#[tokio::test]
async fn test_periodic_scan_until_shutdown() {
    let h = Harness::three_levels().await;
    h.add_loan(1, dec!(20000)).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = ChainScheduler::new(h.engine.clone());
    let handle = tokio::spawn(async move {
        scheduler
            .run_periodic(Duration::from_millis(10), shutdown_rx)
            .await
    });

    let mut built = false;
    for _ in 0..100 {
        if !h.steps(1).await.is_empty() {
            built = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(built);

    // Loans added later are picked up by a later tick.
    h.add_loan(2, dec!(80000)).await;
    let mut built_later = false;
    for _ in 0..100 {
        if h.steps(2).await.len() == 2 {
            built_later = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(built_later);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
