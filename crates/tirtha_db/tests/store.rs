//! Integration tests for the SQLite store.

use chrono::{Duration, Utc};
use tempfile::TempDir;
use tirtha_db::*;
use tirtha_ids::{ContributionId, RunId};
use tirtha_protocol::{
    GateStatus, ImageLabel, ReconKind, ReconsType, RunStatus, TaskKind, TaskStatus, ViewerParams,
};

async fn open_db() -> (TempDir, TirthaDb) {
    let tmp = TempDir::new().unwrap();
    let db = TirthaDb::open(tmp.path().join("tirtha.sqlite")).await.unwrap();
    (tmp, db)
}

async fn seed_contribution(db: &TirthaDb, images: usize) -> (Site, Contribution, Vec<Image>) {
    let site = db
        .insert_site(&NewSite {
            name: "Konark Sun Temple".into(),
            verbose_id: format!("konark-{}", uuid_suffix()),
            district: "Puri".into(),
            state: "Odisha".into(),
            country: "India".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let contributor = db
        .upsert_contributor("Asha", "Asha@Example.com")
        .await
        .unwrap();
    let contribution = db
        .insert_contribution(&site.id, &contributor.id)
        .await
        .unwrap();
    let mut stored = Vec::new();
    for i in 0..images {
        stored.push(
            db.insert_image(&contribution.id, &format!("/uploads/img_{:03}.jpg", i))
                .await
                .unwrap(),
        );
    }
    (site, contribution, stored)
}

fn uuid_suffix() -> String {
    ContributionId::new().short().to_string()
}

fn new_run(site: &Site, contribution: &Contribution, kind: ReconKind) -> NewRun {
    let id = RunId::new();
    NewRun {
        directory: format!("{}/runs/{}", site.id, id),
        id,
        site_id: site.id.clone(),
        contribution_id: Some(contribution.id.clone()),
        kind,
        status: RunStatus::Running,
    }
}

#[tokio::test]
async fn contributor_upsert_is_keyed_by_email() {
    let (_tmp, db) = open_db().await;
    let first = db.upsert_contributor("Asha", "asha@example.com").await.unwrap();
    let second = db.upsert_contributor("Someone Else", " ASHA@example.com ").await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.name, "Asha");
}

#[tokio::test]
async fn find_site_by_id_or_verbose_id() {
    let (_tmp, db) = open_db().await;
    let (site, _, _) = seed_contribution(&db, 0).await;

    let by_id = db.find_site(site.id.as_str()).await.unwrap().unwrap();
    let by_slug = db.find_site(&site.verbose_id).await.unwrap().unwrap();
    assert_eq!(by_id.id, by_slug.id);
    assert_eq!(by_id.location(), "Puri, Odisha, India");
    assert!(db.find_site("nowhere").await.unwrap().is_none());
}

#[tokio::test]
async fn image_counts_only_include_gated_contributions() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, images) = seed_contribution(&db, 4).await;

    // Pending contributions are invisible to the prerun counts
    assert_eq!(db.site_image_counts(&site.id).await.unwrap(), ImageCounts::default());

    db.set_image_label(&images[0].id, ImageLabel::Bad, Some("blurry"))
        .await
        .unwrap();
    db.set_image_label(&images[1].id, ImageLabel::Good, None)
        .await
        .unwrap();
    db.set_gate_status(&contribution.id, GateStatus::Accepted, None)
        .await
        .unwrap();

    let counts = db.site_image_counts(&site.id).await.unwrap();
    assert_eq!(counts, ImageCounts { total: 4, usable: 3 });
    assert!((counts.ratio() - 0.75).abs() < f64::EPSILON);

    let eligible = db.eligible_images(&site.id).await.unwrap();
    assert_eq!(eligible.len(), 3);
    assert!(eligible.iter().all(|img| img.label.is_usable()));
    assert_eq!(db.eligible_contributors(&site.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn contribution_context_resolves_site_and_contributor() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, _) = seed_contribution(&db, 1).await;

    let ctx = db.contribution_context(&contribution.id).await.unwrap();
    assert_eq!(ctx.site.id, site.id);
    assert_eq!(ctx.contributor.email, "asha@example.com");
    assert_eq!(ctx.contribution.gate_status, GateStatus::Pending);

    let missing = db.contribution_context(&ContributionId::new()).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));
}

#[tokio::test]
async fn processed_flag_roundtrip() {
    let (_tmp, db) = open_db().await;
    let (_, contribution, _) = seed_contribution(&db, 0).await;

    db.set_contribution_processed(&contribution.id, true).await.unwrap();
    let stored = db.get_contribution(&contribution.id).await.unwrap().unwrap();
    assert!(stored.processed);
    assert!(stored.processed_at.is_some());

    db.set_contribution_processed(&contribution.id, false).await.unwrap();
    let stored = db.get_contribution(&contribution.id).await.unwrap().unwrap();
    assert!(!stored.processed);
    assert!(stored.processed_at.is_none());
}

#[tokio::test]
async fn second_active_run_for_pair_is_rejected() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, _) = seed_contribution(&db, 0).await;

    let first = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Gs))
        .await
        .unwrap();
    let dup = db.insert_run(&new_run(&site, &contribution, ReconKind::Gs)).await;
    assert!(matches!(dup, Err(DbError::Constraint(_))));

    // The other kind is independent
    db.insert_run(&new_run(&site, &contribution, ReconKind::Av))
        .await
        .unwrap();

    // A failed run frees the pair for a re-trigger
    db.transition_run(&first.id, RunStatus::Running, RunStatus::Error, Some("exit 1"))
        .await
        .unwrap();
    let retry = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Gs))
        .await
        .unwrap();
    let active = db
        .active_run_for_pair(&contribution.id, ReconKind::Gs)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, retry.id);
    assert_eq!(
        db.runs_for_pair(&contribution.id, ReconKind::Gs).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn transitions_are_compare_and_set() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, _) = seed_contribution(&db, 0).await;
    let run = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Av))
        .await
        .unwrap();
    assert!(run.ended_at.is_none());

    let done = db
        .transition_run(&run.id, RunStatus::Running, RunStatus::Done, None)
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Done);
    assert!(done.ended_at.is_some());

    // Stale writer still believes the run is Running
    let stale = db
        .transition_run(&run.id, RunStatus::Running, RunStatus::Error, Some("late"))
        .await;
    assert!(matches!(stale, Err(DbError::InvalidState(_))));

    // Not a documented edge
    let bad = db
        .transition_run(&run.id, RunStatus::Done, RunStatus::Running, None)
        .await;
    assert!(matches!(bad, Err(DbError::InvalidState(_))));

    let archived = db
        .transition_run(&run.id, RunStatus::Done, RunStatus::Archived, Some("archived by ops"))
        .await
        .unwrap();
    assert_eq!(archived.status, RunStatus::Archived);
    assert_eq!(archived.ended_at, done.ended_at);
    assert_eq!(archived.notes, "archived by ops");
}

#[tokio::test]
async fn notes_are_appended() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, _) = seed_contribution(&db, 0).await;
    let run = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Gs))
        .await
        .unwrap();

    db.append_run_note(&run.id, "first").await.unwrap();
    db.append_run_note(&run.id, "second").await.unwrap();
    let run = db.require_run(&run.id).await.unwrap();
    assert_eq!(run.notes, "first\nsecond");
}

#[tokio::test]
async fn viewer_params_and_bindings_persist() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, images) = seed_contribution(&db, 3).await;
    let run = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Gs))
        .await
        .unwrap();

    let params = ViewerParams {
        init_cam_pos: Some([-15.0, -5.0, -16.0]),
        antialiased: Some(true),
        ..Default::default()
    };
    db.set_viewer_params(&run.id, &params).await.unwrap();
    assert_eq!(db.require_run(&run.id).await.unwrap().viewer_params, params);

    let ids: Vec<_> = images.iter().map(|img| img.id.clone()).collect();
    db.bind_run_images(&run.id, &ids).await.unwrap();
    db.bind_run_images(&run.id, &ids).await.unwrap();
    assert_eq!(db.run_image_count(&run.id).await.unwrap(), 3);

    let ctx = db.contribution_context(&contribution.id).await.unwrap();
    db.bind_run_contributors(&run.id, &[ctx.contributor.id.clone()])
        .await
        .unwrap();
    let names: Vec<_> = db
        .run_contributors(&run.id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Asha".to_string()]);
}

#[tokio::test]
async fn stale_running_runs_by_start_time() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, _) = seed_contribution(&db, 0).await;
    let run = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Gs))
        .await
        .unwrap();

    let future = TirthaDb::now_millis() + 60_000;
    let stale = db.stale_running_runs(future).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, run.id);

    let past = run.started_at.timestamp_millis() - 1;
    assert!(db.stale_running_runs(past).await.unwrap().is_empty());
}

fn ark_record(ark: &str, run_id: &RunId) -> ArkRecord {
    ArkRecord {
        ark: ark.to_string(),
        naan: 999999,
        shoulder: "/a".into(),
        assigned_name: ark.trim_start_matches("999999/a").to_string(),
        url: "http://localhost/static/models/x/published/y.glb".into(),
        metadata: serde_json::json!({"monument": {"name": "Konark"}}),
        collisions: 0,
        run_id: run_id.clone(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn ark_uniqueness_is_enforced() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, _) = seed_contribution(&db, 0).await;
    let run_a = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Gs))
        .await
        .unwrap();
    let run_b = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Av))
        .await
        .unwrap();

    db.insert_ark(&ark_record("999999/abcdfghjk", &run_a.id)).await.unwrap();

    let same_string = db.insert_ark(&ark_record("999999/abcdfghjk", &run_b.id)).await;
    assert!(matches!(same_string, Err(DbError::Constraint(_))));

    let same_run = db.insert_ark(&ark_record("999999/azzzzzzzz", &run_a.id)).await;
    assert!(matches!(same_run, Err(DbError::InvalidState(_))));

    let stored = db.ark_for_run(&run_a.id).await.unwrap().unwrap();
    assert_eq!(stored.metadata["monument"]["name"], "Konark");
    assert!(db.ark_exists("999999/abcdfghjk").await.unwrap());
    assert!(db.get_ark("999999/missing").await.unwrap().is_none());
}

#[tokio::test]
async fn queue_respects_eta_and_claims_once() {
    let (_tmp, db) = open_db().await;
    let (_, contribution, _) = seed_contribution(&db, 0).await;
    let now = Utc::now();

    let later = db
        .enqueue_task(&NewTask {
            kind: TaskKind::Recon,
            contribution_id: contribution.id.clone(),
            recons: ReconsType::All,
            eta: now + Duration::hours(1),
            max_attempts: 1,
        })
        .await
        .unwrap();
    let due = db
        .enqueue_task(&NewTask {
            kind: TaskKind::ImageOps,
            contribution_id: contribution.id.clone(),
            recons: ReconsType::All,
            eta: now,
            max_attempts: 1,
        })
        .await
        .unwrap();

    let claimed = db.pop_task(now.timestamp_millis()).await.unwrap().unwrap();
    assert_eq!(claimed.id, due);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.attempts, 1);
    assert!(db.pop_task(now.timestamp_millis()).await.unwrap().is_none());

    let in_two_hours = (now + Duration::hours(2)).timestamp_millis();
    let deferred = db.pop_task(in_two_hours).await.unwrap().unwrap();
    assert_eq!(deferred.id, later);
    assert_eq!(deferred.kind, TaskKind::Recon);

    db.complete_task(due, Some("ok")).await.unwrap();
    db.fail_task(later, "boom").await.unwrap();
    assert!(matches!(
        db.complete_task(due, None).await,
        Err(DbError::InvalidState(_))
    ));

    let stats = db.queue_stats().await.unwrap();
    assert_eq!((stats.total, stats.completed, stats.failed), (2, 1, 1));
}

#[tokio::test]
async fn queued_recon_tasks_are_deduplicated() {
    let (_tmp, db) = open_db().await;
    let (_, contribution, _) = seed_contribution(&db, 0).await;
    let task = NewTask {
        kind: TaskKind::Recon,
        contribution_id: contribution.id.clone(),
        recons: ReconsType::Only(ReconKind::Gs),
        eta: Utc::now(),
        max_attempts: 1,
    };

    let first = db.enqueue_task(&task).await.unwrap();
    let second = db.enqueue_task(&task).await.unwrap();
    assert_eq!(first, second);

    let other_kind = db
        .enqueue_task(&NewTask {
            recons: ReconsType::All,
            ..task.clone()
        })
        .await
        .unwrap();
    assert_ne!(first, other_kind);

    // Once claimed, a new trigger may queue again
    db.pop_task(TirthaDb::now_millis()).await.unwrap().unwrap();
    let after_claim = db.enqueue_task(&task).await.unwrap();
    assert_eq!(db.tasks_for_contribution(&contribution.id).await.unwrap().len(), 3);
    assert_ne!(after_claim, first);
}

#[tokio::test]
async fn expired_claims_are_redelivered() {
    let (_tmp, db) = open_db().await;
    let (_, contribution, _) = seed_contribution(&db, 0).await;
    let id = db
        .enqueue_task(&NewTask {
            kind: TaskKind::ImageOps,
            contribution_id: contribution.id.clone(),
            recons: ReconsType::All,
            eta: Utc::now(),
            max_attempts: 1,
        })
        .await
        .unwrap();

    let claimed_at = TirthaDb::now_millis();
    db.pop_task(claimed_at).await.unwrap().unwrap();

    assert_eq!(db.recover_expired_claims(claimed_at).await.unwrap(), 0);
    assert_eq!(db.recover_expired_claims(claimed_at + 1).await.unwrap(), 1);

    let again = db.pop_task(TirthaDb::now_millis()).await.unwrap().unwrap();
    assert_eq!(again.id, id);
    assert_eq!(again.attempts, 2);
}

#[tokio::test]
async fn renewed_claim_survives_recovery_and_holder_can_still_settle() {
    let (_tmp, db) = open_db().await;
    let (_, contribution, _) = seed_contribution(&db, 0).await;
    let id = db
        .enqueue_task(&NewTask {
            kind: TaskKind::Recon,
            contribution_id: contribution.id.clone(),
            recons: ReconsType::All,
            eta: Utc::now(),
            max_attempts: 1,
        })
        .await
        .unwrap();

    let claimed_at = TirthaDb::now_millis();
    db.pop_task(claimed_at).await.unwrap().unwrap();
    assert!(db.renew_claim(id, claimed_at + 10_000).await.unwrap());
    assert_eq!(db.recover_expired_claims(claimed_at + 5_000).await.unwrap(), 0);

    // Claim lost: back in the queue, renewal refused.
    assert_eq!(db.recover_expired_claims(claimed_at + 20_000).await.unwrap(), 1);
    assert!(!db.renew_claim(id, claimed_at + 30_000).await.unwrap());

    // The original holder's failure still lands in the accounting.
    db.fail_task(id, "GS chain exited 1").await.unwrap();
    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(db.pop_task(claimed_at + 60_000).await.unwrap().is_none());
    assert_eq!(db.queue_stats().await.unwrap().failed, 1);
}

#[tokio::test]
async fn requeue_defers_delivery() {
    let (_tmp, db) = open_db().await;
    let (_, contribution, _) = seed_contribution(&db, 0).await;
    db.enqueue_task(&NewTask {
        kind: TaskKind::Recon,
        contribution_id: contribution.id.clone(),
        recons: ReconsType::All,
        eta: Utc::now(),
        max_attempts: 3,
    })
    .await
    .unwrap();

    let now = TirthaDb::now_millis();
    let task = db.pop_task(now).await.unwrap().unwrap();
    db.requeue_task(task.id, now + 60_000, "transient").await.unwrap();

    assert!(db.pop_task(now).await.unwrap().is_none());
    let retried = db.pop_task(now + 60_000).await.unwrap().unwrap();
    assert_eq!(retried.last_error.as_deref(), Some("transient"));
}

#[tokio::test]
async fn store_stats_group_counts() {
    let (_tmp, db) = open_db().await;
    let (site, contribution, _) = seed_contribution(&db, 2).await;
    let run = db
        .insert_run(&new_run(&site, &contribution, ReconKind::Gs))
        .await
        .unwrap();
    db.transition_run(&run.id, RunStatus::Running, RunStatus::Error, None)
        .await
        .unwrap();

    let stats = db.store_stats().await.unwrap();
    assert_eq!(stats.sites, 1);
    assert_eq!(stats.images, 2);
    assert_eq!(stats.runs_by_status.get("Error"), Some(&1));
    assert_eq!(stats.runs_by_kind.get("GS"), Some(&1));
    assert_eq!(stats.images_by_label.get("unchecked"), Some(&2));
    assert_eq!(stats.contributions_by_gate.get("pending"), Some(&1));
}
