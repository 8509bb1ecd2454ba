//! Game-rule scenarios played across two or three `GameState`s, the way
//! separate client processes would see them.

use peril_game::routing::PlayingState;
use peril_game::{
    ArmyMove, GameLog, GameState, MoveOutcome, Player, Rank, RecognitionOfWar, WarOutcome,
};
use peril_protocol::{BincodeCodec, Codec, JsonCodec};

// =========================================================================
// Helpers
// =========================================================================

fn player_with(name: &str, units: &[(Rank, &str)]) -> GameState {
    let mut gs = GameState::new(name);
    for (rank, location) in units {
        gs.spawn(*rank, (*location).into());
    }
    gs
}

fn declare(attacker: &GameState, defender: &GameState) -> RecognitionOfWar {
    RecognitionOfWar {
        attacker: attacker.player_snapshot(),
        defender: defender.player_snapshot(),
    }
}

// =========================================================================
// Moves
// =========================================================================

#[test]
fn test_handle_move_unoccupied_destination_is_safe() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "americas")]);
    let mut bob = player_with("bob", &[(Rank::Cavalry, "asia")]);

    let mv = alice.move_units("europe".into(), &[1]).unwrap();
    assert_eq!(bob.handle_move(&mv), MoveOutcome::Safe);

    let seen = bob.known_player("alice").expect("alice should be recorded");
    assert_eq!(seen.units[&1].location, "europe".into());
}

#[test]
fn test_handle_move_own_move_is_same_player() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "europe")]);
    // Moving onto our own units is still our own move.
    let mv = alice.move_units("europe".into(), &[1]).unwrap();
    assert_eq!(alice.handle_move(&mv), MoveOutcome::SamePlayer);
    assert!(alice.known_player("alice").is_none());
}

#[test]
fn test_handle_move_onto_local_units_is_make_war() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "americas")]);
    let mut bob = player_with("bob", &[(Rank::Cavalry, "europe")]);

    let mv = alice.move_units("europe".into(), &[1]).unwrap();
    assert_eq!(bob.handle_move(&mv), MoveOutcome::MakeWar);
}

// =========================================================================
// Wars
// =========================================================================

#[test]
fn test_handle_war_third_party_is_not_involved() {
    let alice = player_with("alice", &[(Rank::Infantry, "europe")]);
    let bob = player_with("bob", &[(Rank::Cavalry, "europe")]);
    let mut carol = player_with("carol", &[(Rank::Artillery, "europe")]);

    let resolution = carol.handle_war(&declare(&alice, &bob));
    assert_eq!(resolution.outcome, WarOutcome::NotInvolved);
    assert_eq!(carol.player().units.len(), 1);
}

#[test]
fn test_handle_war_local_left_location_is_no_units() {
    let alice = player_with("alice", &[(Rank::Infantry, "europe")]);
    let mut bob = player_with("bob", &[(Rank::Cavalry, "europe")]);
    let rw = declare(&alice, &bob);

    // bob walks away before the declaration arrives.
    bob.move_units("asia".into(), &[1]).unwrap();
    assert_eq!(bob.handle_war(&rw).outcome, WarOutcome::NoUnits);
    assert_eq!(bob.player().units.len(), 1);
}

#[test]
fn test_handle_war_no_contested_location_is_no_units() {
    let alice = player_with("alice", &[(Rank::Infantry, "europe")]);
    let mut bob = player_with("bob", &[(Rank::Cavalry, "asia")]);
    assert_eq!(bob.handle_war(&declare(&alice, &bob)).outcome, WarOutcome::NoUnits);
}

#[test]
fn test_handle_war_each_side_sees_complementary_outcome() {
    let mut alice = player_with("alice", &[(Rank::Artillery, "europe")]);
    let mut bob = player_with("bob", &[(Rank::Cavalry, "europe")]);
    let rw = declare(&alice, &bob);

    let at_alice = alice.handle_war(&rw);
    let at_bob = bob.handle_war(&rw);

    assert_eq!(at_alice.outcome, WarOutcome::YouWon);
    assert_eq!(at_bob.outcome, WarOutcome::OpponentWon);
    assert_eq!(at_alice.winner, at_bob.winner);
    assert_eq!(at_alice.winner, "alice");
    assert!(bob.player().units.is_empty());
    assert_eq!(alice.player().units.len(), 1);
}

#[test]
fn test_handle_war_swapping_attacker_and_defender_keeps_winner() {
    let armies: [(&[(Rank, &str)], &[(Rank, &str)]); 2] = [
        (&[(Rank::Artillery, "europe")], &[(Rank::Cavalry, "europe")]),
        (
            &[(Rank::Infantry, "europe"), (Rank::Infantry, "europe")],
            &[(Rank::Infantry, "europe")],
        ),
    ];

    for (alice_units, bob_units) in armies {
        let alice = player_with("alice", alice_units);
        let bob = player_with("bob", bob_units);
        let forward = declare(&alice, &bob);
        let swapped = declare(&bob, &alice);

        for rw in [&forward, &swapped] {
            let mut at_alice = player_with("alice", alice_units);
            let mut at_bob = player_with("bob", bob_units);
            let a = at_alice.handle_war(rw);
            let b = at_bob.handle_war(rw);

            assert_eq!(a.outcome, WarOutcome::YouWon);
            assert_eq!(b.outcome, WarOutcome::OpponentWon);
            assert_eq!((a.winner.as_str(), a.loser.as_str()), ("alice", "bob"));
            assert_eq!(a.log_message(), b.log_message());
        }
    }
}

#[test]
fn test_handle_war_draw_is_draw_for_both() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "europe")]);
    let mut bob = player_with("bob", &[(Rank::Infantry, "europe")]);
    let rw = declare(&alice, &bob);

    let at_alice = alice.handle_war(&rw);
    let at_bob = bob.handle_war(&rw);
    assert_eq!(at_alice.outcome, WarOutcome::Draw);
    assert_eq!(at_bob.outcome, WarOutcome::Draw);
    assert_eq!(
        at_bob.log_message().unwrap(),
        "A war between alice and bob resulted in a draw"
    );
    assert!(alice.player().units.is_empty());
    assert!(bob.player().units.is_empty());
}

#[test]
fn test_handle_war_losing_keeps_units_elsewhere() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "europe"), (Rank::Cavalry, "asia")]);
    let bob = player_with("bob", &[(Rank::Cavalry, "europe")]);

    let rw = declare(&alice, &bob);
    let resolution = alice.handle_war(&rw);
    assert_eq!(resolution.outcome, WarOutcome::OpponentWon);
    let left: Vec<u32> = alice.player().units.keys().copied().collect();
    assert_eq!(left, vec![2]);
}

// =========================================================================
// Scenarios
// =========================================================================

#[test]
fn test_scenario_infantry_walks_into_cavalry() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "americas")]);
    let mut bob = player_with("bob", &[(Rank::Cavalry, "europe")]);

    let mv = alice.move_units("europe".into(), &[1]).unwrap();
    assert_eq!(alice.handle_move(&mv), MoveOutcome::SamePlayer);
    assert_eq!(bob.handle_move(&mv), MoveOutcome::MakeWar);

    // bob's process declares war with the mover as attacker.
    let rw = RecognitionOfWar {
        attacker: mv.player.clone(),
        defender: bob.player_snapshot(),
    };
    let at_alice = alice.handle_war(&rw);
    let at_bob = bob.handle_war(&rw);

    assert_eq!(at_alice.outcome, WarOutcome::OpponentWon);
    assert_eq!(at_bob.outcome, WarOutcome::YouWon);

    let message = at_bob.log_message().unwrap();
    assert_eq!(message, "bob won a war against alice");
    assert_eq!(at_alice.log_message().unwrap(), message);

    let log = GameLog::new(bob.username(), message);
    assert!(log.to_string().ends_with("bob: bob won a war against alice"));
}

#[test]
fn test_scenario_redelivered_war_returns_cached_outcome() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "europe"), (Rank::Infantry, "europe")]);
    let bob = player_with("bob", &[(Rank::Cavalry, "europe")]);
    let rw = declare(&alice, &bob);

    let first = alice.handle_war(&rw);
    assert_eq!(first.outcome, WarOutcome::OpponentWon);
    assert!(alice.player().units.is_empty());

    // Respawn at the same place: a redelivery must not cost these units.
    alice.spawn(Rank::Infantry, "europe".into());
    let second = alice.handle_war(&rw);

    assert_eq!(second, first);
    assert_eq!(alice.player().units.len(), 1);
    assert_eq!(alice.ledger().len(), 1);
}

#[test]
fn test_scenario_pause_and_resume() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "europe")]);

    alice.handle_pause(PlayingState { is_paused: true });
    assert!(alice.is_paused());
    assert!(alice.status().to_string().contains("paused"));
    assert!(alice.move_units("asia".into(), &[1]).is_err());

    alice.handle_pause(PlayingState { is_paused: false });
    assert!(!alice.is_paused());
    assert!(alice.status().to_string().contains("running"));
    assert!(alice.move_units("asia".into(), &[1]).is_ok());
}

// =========================================================================
// Wire formats
// =========================================================================

#[test]
fn test_events_survive_json_and_bincode() {
    let mut alice = player_with("alice", &[(Rank::Infantry, "americas"), (Rank::Artillery, "asia")]);
    let bob = player_with("bob", &[(Rank::Cavalry, "europe")]);
    let mv: ArmyMove = alice.move_units("europe".into(), &[1]).unwrap();
    let rw = declare(&alice, &bob);
    let pause = PlayingState { is_paused: true };
    let log = GameLog::new("bob", "bob won a war against alice");

    let json = JsonCodec;
    assert_eq!(json.decode::<ArmyMove>(&json.encode(&mv).unwrap()).unwrap(), mv);
    assert_eq!(json.decode::<RecognitionOfWar>(&json.encode(&rw).unwrap()).unwrap(), rw);
    assert_eq!(json.decode::<PlayingState>(&json.encode(&pause).unwrap()).unwrap(), pause);

    let bin = BincodeCodec;
    assert_eq!(bin.decode::<GameLog>(&bin.encode(&log).unwrap()).unwrap(), log);
    assert_eq!(bin.decode::<Player>(&bin.encode(&mv.player).unwrap()).unwrap(), mv.player);
}

#[test]
fn test_rank_json_is_lowercase() {
    let bytes = JsonCodec.encode(&Rank::Artillery).unwrap();
    assert_eq!(bytes, b"\"artillery\"");
}
