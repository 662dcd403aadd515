mod support;

use domain_newsletter::{
    AbTest, Campaign, CampaignRepository, CampaignStatus, ClaimRequest, CursorKind, DrainOutcome,
    QueueCursor, QueueStore, RecordingTransport,
};
use std::time::Duration;
use support::{Harness, NEWSLETTER_ID, SITE_ID};

#[tokio::test]
async fn test_drain_sends_every_row_across_batches() {
    let h = Harness::new().await;
    h.due_campaign(1).await;
    h.subscribe_many(12).await;
    h.service.generate_queue(1).await.unwrap();

    let report = h.service.drain(false, Some(1)).await.unwrap();
    assert_eq!(report.sent, 12);
    assert_eq!(report.failed, 0);
    assert_eq!(report.outcome, DrainOutcome::Finished);

    assert!(h.queue.items(1).await.is_empty());
    assert_eq!(h.transport.sent().await.len(), 12);
    let campaign = h.campaigns.campaign(1).await.unwrap().unwrap();
    assert_eq!(campaign.sent_count, 12);
    assert_eq!(campaign.status, CampaignStatus::Finished);
    assert!(campaign.last_sent_at.is_some());
}

#[tokio::test]
async fn test_auto_pick_finds_generated_campaign() {
    let h = Harness::new().await;
    h.due_campaign(1).await;
    h.subscribe_many(3).await;
    h.service.generate_queue(1).await.unwrap();

    let report = h.service.drain(false, None).await.unwrap();
    assert_eq!(report.campaign_id, Some(1));
    assert_eq!(report.sent, 3);

    let report = h.service.drain(false, None).await.unwrap();
    assert_eq!(report.outcome, DrainOutcome::NothingToSend);
}

#[tokio::test]
async fn test_failed_row_waits_for_retry_drain() {
    let h = Harness::new().await;
    h.due_campaign(1).await;
    h.subscribe_contacts(1, &["a@example.com", "b@example.com", "c@example.com"])
        .await;
    h.service.generate_queue(1).await.unwrap();
    h.transport.fail_address("b@example.com").await;

    let report = h.service.drain(false, Some(1)).await.unwrap();
    assert_eq!((report.sent, report.failed), (2, 1));
    assert_eq!(report.outcome, DrainOutcome::Finished);

    let rows = h.queue.items(1).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].address, "b@example.com");
    assert!(rows[0].last_error.as_deref().unwrap().contains("mailbox unavailable"));
    assert!(!rows[0].sending);

    // A plain drain skips failed rows
    let report = h.service.drain(false, Some(1)).await.unwrap();
    assert_eq!((report.sent, report.failed), (0, 0));

    h.transport.recover_address("b@example.com").await;
    let report = h.service.drain(true, Some(1)).await.unwrap();
    assert_eq!((report.sent, report.failed), (1, 0));

    assert!(h.queue.items(1).await.is_empty());
    let campaign = h.campaigns.campaign(1).await.unwrap().unwrap();
    assert_eq!(campaign.sent_count, 3);
}

#[tokio::test]
async fn test_rows_claimed_by_a_crashed_drain_come_back_on_retry() {
    let h = Harness::new().await;
    h.due_campaign(1).await;
    h.subscribe_many(12).await;
    h.service.generate_queue(1).await.unwrap();

    // Simulate a drain that claimed a batch and died
    let orphaned = h
        .queue
        .claim_batch(ClaimRequest {
            campaign_id: 1,
            after: QueueCursor::start(CursorKind::Id),
            limit: 10,
            include_failed: false,
        })
        .await
        .unwrap();
    assert_eq!(orphaned.len(), 10);

    let report = h.service.drain(false, Some(1)).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(h.queue.count(1).await.unwrap(), 10);

    let report = h.service.drain(true, Some(1)).await.unwrap();
    assert_eq!(report.sent, 10);
    assert_eq!(h.queue.count(1).await.unwrap(), 0);

    let campaign = h.campaigns.campaign(1).await.unwrap().unwrap();
    assert_eq!(campaign.sent_count, 12);
}

#[tokio::test]
async fn test_only_one_drain_runs_at_a_time() {
    let h = Harness::builder()
        .transport(RecordingTransport::new().with_delay(Duration::from_millis(5)))
        .build()
        .await;
    h.due_campaign(1).await;
    h.subscribe_many(5).await;
    h.service.generate_queue(1).await.unwrap();

    let handle = h.service.start_drain(false, Some(1)).unwrap();
    assert!(h.service.is_draining());
    assert!(h.service.start_drain(false, Some(1)).is_none());
    assert!(h.service.drain(true, None).await.is_none());

    let report = handle.await.unwrap();
    assert_eq!(report.sent, 5);
    assert!(!h.service.is_draining());

    // Every address went out exactly once
    let mut sent = h.transport.sent_addresses().await;
    sent.sort();
    sent.dedup();
    assert_eq!(sent.len(), 5);
}

#[tokio::test]
async fn test_switching_sending_off_stops_the_drain() {
    let h = Harness::builder()
        .transport(RecordingTransport::new().with_delay(Duration::from_millis(20)))
        .batch_size(2)
        .build()
        .await;
    h.due_campaign(1).await;
    h.subscribe_many(10).await;
    h.service.generate_queue(1).await.unwrap();

    let handle = h.service.start_drain(false, Some(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.settings.set_emails_enabled(false);
    h.service.notify_setting_changed();

    let report = handle.await.unwrap();
    assert_eq!(report.outcome, DrainOutcome::Stopped);
    assert!(report.sent > 0 && report.sent < 10);

    // Nothing is left claimed and the campaign is not finished
    let rows = h.queue.items(1).await;
    assert_eq!(rows.len() as u64, 10 - report.sent);
    assert!(rows.iter().all(|r| !r.sending));
    let campaign = h.campaigns.campaign(1).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Sending);
}

#[tokio::test]
async fn test_switching_sending_off_stops_the_drain_without_notification() {
    let h = Harness::builder()
        .transport(RecordingTransport::new().with_delay(Duration::from_millis(20)))
        .batch_size(2)
        .build()
        .await;
    h.due_campaign(1).await;
    h.subscribe_many(10).await;
    h.service.generate_queue(1).await.unwrap();

    let handle = h.service.start_drain(false, Some(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.settings.set_generate_newsletters(false);

    let report = handle.await.unwrap();
    assert_eq!(report.outcome, DrainOutcome::Stopped);
    assert!(report.sent > 0 && report.sent < 10);
    assert_eq!(h.queue.count(1).await.unwrap(), 10 - report.sent);
}

async fn ab_parent_with_two_variants(h: &Harness) {
    h.due_campaign(1).await;
    h.campaigns
        .insert(Campaign::newsletter(2, SITE_ID, NEWSLETTER_ID).variant_of(1))
        .await;
    h.campaigns
        .insert(Campaign::newsletter(3, SITE_ID, NEWSLETTER_ID).variant_of(1))
        .await;
    h.subscribe_many(10).await;
}

#[tokio::test]
async fn test_generating_the_ab_parent_caps_each_variant() {
    let h = Harness::new().await;
    ab_parent_with_two_variants(&h).await;
    h.campaigns.save_ab_test(AbTest::new(1, 40)).await.unwrap();

    h.service.generate_queue(1).await.unwrap();
    let test = h.campaigns.ab_test(1).await.unwrap().unwrap();
    assert_eq!(test.per_variant_quota, Some(2));

    let report = h.service.drain(false, Some(2)).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.outcome, DrainOutcome::QuotaReached);
    assert_eq!(h.queue.count(1).await.unwrap(), 8);
}

#[tokio::test]
async fn test_variant_without_stored_quota_is_still_capped() {
    let h = Harness::new().await;
    ab_parent_with_two_variants(&h).await;
    // The test is created after the audience was generated
    h.service.generate_queue(1).await.unwrap();
    h.campaigns.save_ab_test(AbTest::new(1, 40)).await.unwrap();

    let report = h.service.drain(false, Some(2)).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.outcome, DrainOutcome::QuotaReached);
}

#[tokio::test]
async fn test_ab_test_variants_then_winner_sends_the_rest() {
    let h = Harness::new().await;
    h.due_campaign(1).await;
    h.campaigns
        .insert(Campaign::newsletter(2, SITE_ID, NEWSLETTER_ID).variant_of(1))
        .await;
    h.campaigns
        .insert(Campaign::newsletter(3, SITE_ID, NEWSLETTER_ID).variant_of(1))
        .await;
    h.campaigns.save_ab_test(AbTest::new(1, 40)).await.unwrap();
    h.subscribe_many(10).await;
    h.service.generate_queue(2).await.unwrap();

    // Undecided parents are not picked automatically
    let report = h.service.drain(false, None).await.unwrap();
    assert_eq!(report.outcome, DrainOutcome::NothingToSend);

    let report = h.service.drain(false, Some(2)).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.outcome, DrainOutcome::QuotaReached);
    let parent = h.campaigns.campaign(1).await.unwrap().unwrap();
    assert_eq!(parent.status, CampaignStatus::TestPhase);
    assert!(h.winner.scheduled().await.is_empty());

    let report = h.service.drain(false, Some(3)).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(h.winner.scheduled().await, vec![1]);
    assert_eq!(h.queue.count(1).await.unwrap(), 6);

    let mut test = h.campaigns.ab_test(1).await.unwrap().unwrap();
    test.winner_campaign_id = Some(3);
    h.campaigns.save_ab_test(test).await.unwrap();

    // The loser has nothing left to send
    let report = h.service.drain(false, Some(2)).await.unwrap();
    assert_eq!(report.outcome, DrainOutcome::NothingToSend);

    let report = h.service.drain(false, Some(1)).await.unwrap();
    assert_eq!(report.campaign_id, Some(3));
    assert_eq!(report.sent, 6);
    assert_eq!(report.outcome, DrainOutcome::Finished);

    let parent = h.campaigns.campaign(1).await.unwrap().unwrap();
    assert_eq!(parent.status, CampaignStatus::Finished);
    assert_eq!(parent.sent_count, 10);
    let winner = h.campaigns.campaign(3).await.unwrap().unwrap();
    assert_eq!(winner.sent_count, 8);
    let loser = h.campaigns.campaign(2).await.unwrap().unwrap();
    assert_eq!(loser.sent_count, 2);

    let mut sent = h.transport.sent_addresses().await;
    sent.sort();
    sent.dedup();
    assert_eq!(sent.len(), 10);
}
