mod common;

use campus_poll::EngineError;
use campus_poll::models::{PollPatch, PollStatus, ResultDisclosure, ScopeKind, Voter};
use campus_poll::voting::Winner;
use chrono::{Duration, Utc};
use common::{ADMIN, lunch, memory_engine, option_id, votes_for};
use std::sync::Arc;

#[tokio::test]
async fn second_vote_is_rejected_and_tally_unchanged() {
    let engine = memory_engine();
    let mut def = lunch();
    def.save_as_draft = true;
    let poll = engine.catalog.create_poll(def, ADMIN).await.unwrap();
    engine
        .catalog
        .set_status(&poll.id, PollStatus::Active, ADMIN)
        .await
        .unwrap();

    let pizza = option_id(&poll, "Pizza");
    let sushi = option_id(&poll, "Sushi");

    engine.ledger.cast_vote(&poll.id, "V1", vec![pizza]).await.unwrap();
    let err = engine
        .ledger
        .cast_vote(&poll.id, "V1", vec![sushi])
        .await
        .unwrap_err();
    assert!(err.already_recorded());

    let tally = engine.results.tally(&poll.id).await.unwrap();
    assert_eq!(tally.total_votes, 1);
    let counts: Vec<(String, u64)> = tally
        .options
        .iter()
        .map(|o| (o.text.clone(), o.votes))
        .collect();
    assert_eq!(
        counts,
        vec![("Pizza".to_string(), 1), ("Sushi".to_string(), 0)]
    );
    assert!(engine.ledger.has_voted(&poll.id, "V1").await.unwrap());
    assert!(!engine.ledger.has_voted(&poll.id, "V2").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_from_one_voter_accept_exactly_one() {
    let engine = Arc::new(memory_engine());
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    let pizza = option_id(&poll, "Pizza");

    let mut handles = Vec::new();
    for _ in 0..32 {
        let engine = Arc::clone(&engine);
        let poll_id = poll.id.clone();
        let pizza = pizza.clone();
        handles.push(tokio::spawn(async move {
            engine.ledger.cast_vote(&poll_id, "same-voter", vec![pizza]).await
        }));
    }

    let mut accepted = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::AlreadyVoted { .. }) => already += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(already, 31);

    let stored = engine.catalog.get_poll(&poll.id).await.unwrap();
    assert_eq!(votes_for(&stored, "Pizza"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counts_match_records_after_concurrent_voting() {
    let engine = Arc::new(memory_engine());
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    let pizza = option_id(&poll, "Pizza");
    let sushi = option_id(&poll, "Sushi");

    let mut handles = Vec::new();
    for i in 0..60 {
        let engine = Arc::clone(&engine);
        let poll_id = poll.id.clone();
        let choice = if i % 3 == 0 { sushi.clone() } else { pizza.clone() };
        handles.push(tokio::spawn(async move {
            engine
                .ledger
                .cast_vote(&poll_id, &format!("voter-{}", i), vec![choice])
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = engine.catalog.get_poll(&poll.id).await.unwrap();
    let tally = engine.results.tally(&poll.id).await.unwrap();
    let ballots = engine.results.ballots(&poll.id).await.unwrap();

    assert_eq!(stored.total_selections(), 60);
    assert_eq!(tally.total_votes, 60);
    assert_eq!(ballots.len(), 60);
    assert_eq!(votes_for(&stored, "Pizza"), 40);
    assert_eq!(votes_for(&stored, "Sushi"), 20);
}

#[tokio::test]
async fn multi_select_counts_every_choice() {
    let engine = memory_engine();

    let single = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    let err = engine
        .ledger
        .cast_vote(
            &single.id,
            "V1",
            vec![option_id(&single, "Pizza"), option_id(&single, "Sushi")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut def = lunch();
    def.allow_multiple = true;
    let multi = engine.catalog.create_poll(def, ADMIN).await.unwrap();
    engine
        .ledger
        .cast_vote(
            &multi.id,
            "V1",
            vec![option_id(&multi, "Pizza"), option_id(&multi, "Sushi")],
        )
        .await
        .unwrap();

    let stored = engine.catalog.get_poll(&multi.id).await.unwrap();
    assert_eq!(votes_for(&stored, "Pizza"), 1);
    assert_eq!(votes_for(&stored, "Sushi"), 1);

    // Percentages are shares of ballots, so both options sit at 100%.
    let tally = engine.results.tally(&multi.id).await.unwrap();
    assert_eq!(tally.total_votes, 1);
    assert!(tally.options.iter().all(|o| o.percent == 100));
}

#[tokio::test]
async fn empty_and_unknown_selections_are_rejected() {
    let engine = memory_engine();
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();

    assert!(matches!(
        engine.ledger.cast_vote(&poll.id, "V1", vec![]).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .ledger
            .cast_vote(&poll.id, "V1", vec!["missing".to_string()])
            .await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine
            .ledger
            .cast_vote("no-such-poll", "V1", vec!["x".to_string()])
            .await,
        Err(EngineError::NotFound(_))
    ));
    assert!(!engine.ledger.has_voted(&poll.id, "V1").await.unwrap());
}

#[tokio::test]
async fn closed_poll_rejects_votes_and_keeps_tally() {
    let engine = memory_engine();
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    let pizza = option_id(&poll, "Pizza");
    engine
        .ledger
        .cast_vote(&poll.id, "V1", vec![pizza.clone()])
        .await
        .unwrap();

    let err = engine
        .catalog
        .set_status(&poll.id, PollStatus::Draft, ADMIN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    engine
        .catalog
        .set_status(&poll.id, PollStatus::Closed, ADMIN)
        .await
        .unwrap();
    let err = engine
        .ledger
        .cast_vote(&poll.id, "V2", vec![pizza])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    let tally = engine.results.tally(&poll.id).await.unwrap();
    assert_eq!(tally.status, PollStatus::Closed);
    assert_eq!(tally.total_votes, 1);
}

#[tokio::test]
async fn draft_poll_rejects_votes() {
    let engine = memory_engine();
    let mut def = lunch();
    def.save_as_draft = true;
    let poll = engine.catalog.create_poll(def, ADMIN).await.unwrap();
    let err = engine
        .ledger
        .cast_vote(&poll.id, "V1", vec![option_id(&poll, "Pizza")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn out_of_scope_voter_cannot_vote() {
    let engine = memory_engine();
    let mut def = lunch();
    def.scope = ScopeKind::Faculty;
    def.scope_value = Some("Engineering".into());
    let poll = engine.catalog.create_poll(def, ADMIN).await.unwrap();
    let pizza = option_id(&poll, "Pizza");

    let artist = Voter::new("arts-1").with_faculty("Arts");
    let err = engine
        .ledger
        .cast_vote_as(&poll.id, &artist, vec![pizza.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let engineer = Voter::new("eng-1").with_faculty("Engineering");
    engine
        .ledger
        .cast_vote_as(&poll.id, &engineer, vec![pizza])
        .await
        .unwrap();
}

#[tokio::test]
async fn voted_option_cannot_be_removed_while_active() {
    let engine = memory_engine();
    let mut def = lunch();
    def.options.push("Tacos".into());
    let poll = engine.catalog.create_poll(def, ADMIN).await.unwrap();
    let pizza = option_id(&poll, "Pizza");
    engine
        .ledger
        .cast_vote(&poll.id, "V1", vec![pizza.clone()])
        .await
        .unwrap();

    let err = engine
        .catalog
        .remove_option(&poll.id, &pizza, ADMIN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    let tacos = option_id(&poll, "Tacos");
    let poll = engine
        .catalog
        .remove_option(&poll.id, &tacos, ADMIN)
        .await
        .unwrap();
    assert_eq!(poll.options.len(), 2);
    assert_eq!(votes_for(&poll, "Pizza"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn description_edits_race_votes_without_losing_either() {
    let engine = Arc::new(memory_engine());
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    let sushi = option_id(&poll, "Sushi");

    let mut voters = Vec::new();
    for i in 0..40 {
        let engine = Arc::clone(&engine);
        let poll_id = poll.id.clone();
        let sushi = sushi.clone();
        voters.push(tokio::spawn(async move {
            engine
                .ledger
                .cast_vote(&poll_id, &format!("voter-{}", i), vec![sushi])
                .await
        }));
    }

    for round in 0..10 {
        let edited = engine
            .catalog
            .edit_poll(
                &poll.id,
                PollPatch {
                    description: Some(format!("Vote by noon ({})", round)),
                    ..PollPatch::default()
                },
                ADMIN,
            )
            .await
            .unwrap();
        assert_eq!(edited.version, poll.version + round + 1);
    }
    for handle in voters {
        handle.await.unwrap().unwrap();
    }

    let stored = engine.catalog.get_poll(&poll.id).await.unwrap();
    assert_eq!(stored.description, "Vote by noon (9)");
    assert_eq!(votes_for(&stored, "Sushi"), 40);
    assert_eq!(engine.results.tally(&poll.id).await.unwrap().total_votes, 40);
}

#[tokio::test]
async fn vote_after_end_time_is_rejected_before_scheduler_closes() {
    let engine = memory_engine();
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    engine
        .catalog
        .edit_poll(
            &poll.id,
            PollPatch {
                end_at: Some(Some(Utc::now() - Duration::seconds(1))),
                ..PollPatch::default()
            },
            ADMIN,
        )
        .await
        .unwrap();

    let err = engine
        .ledger
        .cast_vote(&poll.id, "V1", vec![option_id(&poll, "Pizza")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(msg) if msg.contains("end time")));
    let stored = engine.catalog.get_poll(&poll.id).await.unwrap();
    assert_eq!(stored.status, PollStatus::Active);
    assert_eq!(stored.total_selections(), 0);
}

#[tokio::test]
async fn winner_reports_ties() {
    let engine = memory_engine();
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    assert_eq!(
        engine.results.winning_option(&poll.id).await.unwrap(),
        Winner::NoVotes
    );

    engine
        .ledger
        .cast_vote(&poll.id, "V1", vec![option_id(&poll, "Pizza")])
        .await
        .unwrap();
    engine
        .ledger
        .cast_vote(&poll.id, "V2", vec![option_id(&poll, "Sushi")])
        .await
        .unwrap();
    match engine.results.winning_option(&poll.id).await.unwrap() {
        Winner::Tie(options) => assert_eq!(options.len(), 2),
        other => panic!("expected tie, got {:?}", other),
    }

    engine
        .ledger
        .cast_vote(&poll.id, "V3", vec![option_id(&poll, "Sushi")])
        .await
        .unwrap();
    match engine.results.winning_option(&poll.id).await.unwrap() {
        Winner::Single(option) => assert_eq!(option.text, "Sushi"),
        other => panic!("expected single winner, got {:?}", other),
    }
}

#[tokio::test]
async fn results_hidden_until_disclosure() {
    let engine = memory_engine();
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    let now = Utc::now();

    let err = engine.results.disclosed_tally(&poll.id, now).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    engine
        .catalog
        .set_status(&poll.id, PollStatus::Closed, ADMIN)
        .await
        .unwrap();
    assert!(engine.results.disclosed_tally(&poll.id, now).await.is_ok());

    let mut def = lunch();
    def.disclosure = ResultDisclosure::At(now + Duration::hours(6));
    let timed = engine.catalog.create_poll(def, ADMIN).await.unwrap();
    assert!(engine.results.disclosed_tally(&timed.id, now).await.is_err());
    assert!(
        engine
            .results
            .disclosed_tally(&timed.id, now + Duration::hours(6))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn anonymous_ballots_hide_voters() {
    let engine = memory_engine();
    let mut def = lunch();
    def.is_anonymous = true;
    let poll = engine.catalog.create_poll(def, ADMIN).await.unwrap();
    engine
        .ledger
        .cast_vote(&poll.id, "V1", vec![option_id(&poll, "Pizza")])
        .await
        .unwrap();

    let ballots = engine.results.ballots(&poll.id).await.unwrap();
    assert_eq!(ballots.len(), 1);
    assert_eq!(ballots[0].voter_id, None);

    let open = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    engine
        .ledger
        .cast_vote(&open.id, "V1", vec![option_id(&open, "Pizza")])
        .await
        .unwrap();
    let ballots = engine.results.ballots(&open.id).await.unwrap();
    assert_eq!(ballots[0].voter_id.as_deref(), Some("V1"));
}

#[tokio::test]
async fn turnout_by_faculty() {
    let engine = memory_engine();
    let poll = engine.catalog.create_poll(lunch(), ADMIN).await.unwrap();
    let pizza = option_id(&poll, "Pizza");

    let roster = vec![
        Voter::new("e1").with_faculty("Engineering"),
        Voter::new("e2").with_faculty("Engineering"),
        Voter::new("m1").with_faculty("Management Science"),
        Voter::new("m2").with_faculty("Management Science"),
        Voter::new("m3").with_faculty("Management Science"),
    ];
    for voter in ["e1", "e2", "m1"] {
        engine
            .ledger
            .cast_vote(&poll.id, voter, vec![pizza.clone()])
            .await
            .unwrap();
    }

    let groups = engine.results.scoped_turnout(&poll.id, &roster).await.unwrap();
    assert_eq!(groups["Engineering"].turnout_percent, 100);
    assert_eq!(groups["Management Science"].voted_count, 1);
    assert_eq!(groups["Management Science"].turnout_percent, 33);

    let tally = engine
        .results
        .tally_with_roster(&poll.id, &roster)
        .await
        .unwrap();
    let turnout = tally.turnout.expect("roster turnout");
    assert_eq!(turnout.voter_roll, 5);
    assert_eq!(turnout.voted_count, 3);
    assert_eq!(turnout.not_voted_count, 2);
    assert_eq!(turnout.voted_percent, 60);
    assert_eq!(turnout.not_voted_percent, 40);
    assert_eq!(
        engine.results.turnout(&poll.id, &roster).await.unwrap(),
        turnout
    );
}
