//! Live "trending this week" counters kept in Redis sorted sets.

use fred::{
    clients::Pool as RedisPool,
    prelude::{KeysInterface, SortedSetsInterface},
};

use super::week::WeekKey;

/// Counters outlive their week so the previous one can still be read.
const TRENDING_TTL_SECS: i64 = 60 * 60 * 24 * 14;

#[must_use]
pub fn trending_key(week: WeekKey) -> String {
    format!("trending:{week}")
}

/// Bumps a track's stream count for `week`.
///
/// # Errors
/// Fails if Redis can't be reached.
pub async fn record_stream(redis: &RedisPool, week: WeekKey, track_id: i32) -> anyhow::Result<()> {
    let key = trending_key(week);
    let _: f64 = redis.zincrby(key.as_str(), 1.0, track_id).await?;
    let _: () = redis.expire(key.as_str(), TRENDING_TTL_SECS, None).await?;
    Ok(())
}

/// The most streamed tracks of `week`, best first.
///
/// # Errors
/// Fails if Redis can't be reached.
pub async fn top(redis: &RedisPool, week: WeekKey, limit: i64) -> anyhow::Result<Vec<(i32, i64)>> {
    if limit <= 0 {
        return Ok(Vec::new());
    }
    let ranked: Vec<(String, f64)> = redis
        .zrevrange(trending_key(week), 0, limit - 1, true)
        .await?;
    Ok(parse_ranked(ranked))
}

/// Drops members that aren't track IDs. Scores are whole stream counts.
fn parse_ranked(ranked: Vec<(String, f64)>) -> Vec<(i32, i64)> {
    ranked
        .into_iter()
        .filter_map(|(member, score)| {
            #[allow(clippy::cast_possible_truncation)]
            member.parse().ok().map(|id| (id, score.round() as i64))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_includes_week() {
        let week: WeekKey = "2026-W42".parse().unwrap();
        assert_eq!(trending_key(week), "trending:2026-W42");
    }

    #[test]
    fn parse_skips_garbage_members() {
        let parsed = parse_ranked(vec![
            ("12".to_owned(), 40.0),
            ("junk".to_owned(), 30.0),
            ("7".to_owned(), 2.0),
        ]);
        assert_eq!(parsed, vec![(12, 40), (7, 2)]);
    }
}
