// Multi-party runs over the in-process network: every party executes the same
// program concurrently and must arrive at the same plaintext.

use std::sync::Arc;

use futures::future;
use rand::Rng;

use crate::config::SessionConfig;
use crate::error::{MpcError, Result};
use crate::net::local::LocalNetwork;
use crate::pending::PendingValue;
use crate::session::Session;

/// Each party shares its own input, every party sums all shared inputs and
/// opens the sum.
async fn sum_inputs(session: Arc<Session>, input: u64) -> Result<u64> {
    let shares = session.share(input)?;
    let total = shares
        .values()
        .skip(1)
        .try_fold(shares[&1].clone(), |acc, value| acc.add(value))?;
    session.open(&total)?.await
}

async fn run_sum(party_count: usize, inputs: &[u64]) -> Vec<u64> {
    let (sessions, _pumps) = LocalNetwork::start(SessionConfig::new("sum", party_count))
        .await
        .unwrap();
    let runs = sessions
        .into_iter()
        .zip(inputs.iter().copied())
        .map(|(session, input)| tokio::spawn(sum_inputs(session, input)));
    future::join_all(runs)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect()
}

#[tokio::test]
async fn test_three_parties_open_their_sum() {
    let results = run_sum(3, &[10, 20, 30]).await;
    assert_eq!(results, vec![60, 60, 60]);
}

#[tokio::test]
async fn test_random_inputs_add_homomorphically() {
    let mut rng = rand::rng();
    for party_count in [4, 5] {
        let inputs: Vec<u64> = (0..party_count).map(|_| rng.random_range(0..1_000_000)).collect();
        let expected: u64 = inputs.iter().sum();
        let results = run_sum(party_count, &inputs).await;
        assert!(results.iter().all(|&r| r == expected), "{:?}", results);
    }
}

#[tokio::test]
async fn test_two_party_difference_wraps() {
    let (sessions, _pumps) = LocalNetwork::start(SessionConfig::new("diff", 2)).await.unwrap();
    let inputs = [5u64, 7];

    let runs = sessions.into_iter().zip(inputs).map(|(session, input)| {
        tokio::spawn(async move {
            let shares = session.share(input)?;
            let diff = shares[&1].sub(&shares[&2])?;
            let opening = diff.open()?;
            opening.await
        })
    });
    let p = crate::field::DEFAULT_MODULUS;
    for result in future::join_all(runs).await {
        assert_eq!(result.unwrap().unwrap(), p - 2);
    }
}

#[tokio::test]
async fn test_seeded_program_uses_seeded_ids() {
    let (sessions, _pumps) = LocalNetwork::start(SessionConfig::new("seeded", 3)).await.unwrap();

    let runs = sessions.into_iter().enumerate().map(|(i, session)| {
        tokio::spawn(async move {
            session.seed_ids(7);
            let shares = session.share(i as u64 + 1)?;
            let opening = shares[&3].cmul(2).open()?;
            let op_id = opening.op_id().to_string();
            Ok::<_, MpcError>((op_id, opening.await?))
        })
    });
    for result in future::join_all(runs).await {
        let (op_id, value) = result.unwrap().unwrap();
        assert_eq!(op_id, "7:open1");
        assert_eq!(value, 6);
    }
}

#[tokio::test]
async fn test_share_array_and_open_all() {
    let (sessions, _pumps) = LocalNetwork::start(SessionConfig::new("arrays", 3)).await.unwrap();

    let runs = sessions.into_iter().map(|session| {
        tokio::spawn(async move {
            let me = session.party_id().unwrap_or_default() as u64;
            let shared = session.share_array(&[me, me * 100])?;
            // Open party 2's array element-wise.
            let values: Vec<PendingValue> = shared.iter().map(|m| m[&2].clone()).collect();
            let openings = session.open_all(&values)?;
            future::try_join_all(openings).await
        })
    });
    for result in future::join_all(runs).await {
        assert_eq!(result.unwrap().unwrap(), vec![2, 200]);
    }
}

#[tokio::test]
async fn test_constants_mix_with_shares() {
    let (sessions, _pumps) = LocalNetwork::start(SessionConfig::new("mixed", 3)).await.unwrap();

    let runs = sessions.into_iter().enumerate().map(|(i, session)| {
        tokio::spawn(async move {
            let shares = session.share(10 * (i as u64 + 1))?;
            // 3 * x1 + (x2 - x3) + 4, built before any fragment is known
            let expr = shares[&1]
                .cmul(3)
                .add(&shares[&2].sub(&shares[&3])?)?
                .cadd(4);
            expr.open()?.await
        })
    });
    for result in future::join_all(runs).await {
        assert_eq!(result.unwrap().unwrap(), 24);
    }
}
