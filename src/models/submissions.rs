use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::tracks::TrackWithArtist;
use crate::{
    schema::weekly_submissions,
    util::{jam_types::SubmissionStatus, week::WeekKey},
};

/// A user's entry for one week and chart category.
#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = weekly_submissions, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct WeeklySubmission {
    pub id: i32,
    pub user_id: i32,
    pub track_id: i32,
    pub week_key: String,
    pub category: String,
    pub status: SubmissionStatus,
    pub note: Option<String>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub submitted_at: OffsetDateTime,
    #[serde(serialize_with = "time::serde::iso8601::option::serialize")]
    pub reviewed_at: Option<OffsetDateTime>,
    pub reviewed_by: Option<i32>,
    /// Left by the reviewer, shown to the submitter
    pub review_note: Option<String>,
}

impl WeeklySubmission {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == SubmissionStatus::Pending
    }

    /// Approves or rejects a pending submission.
    ///
    /// # Errors
    /// Fails with `NotFound` if the submission is no longer pending.
    pub async fn review(
        &self,
        approve: bool,
        reviewer_id: i32,
        reviewer_note: Option<&str>,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<Self> {
        use crate::schema::weekly_submissions::dsl::*;

        let new_status = if approve {
            SubmissionStatus::Approved
        } else {
            SubmissionStatus::Rejected
        };

        // The status filter keeps two reviewers from overwriting each other
        diesel::update(
            weekly_submissions
                .filter(id.eq(self.id))
                .filter(status.eq(SubmissionStatus::Pending)),
        )
        .set((
            status.eq(new_status),
            reviewed_at.eq(Some(OffsetDateTime::now_utc())),
            reviewed_by.eq(Some(reviewer_id)),
            review_note.eq(reviewer_note),
        ))
        .get_result(conn)
        .await
    }
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionWithTrack {
    #[serde(flatten)]
    pub submission: WeeklySubmission,
    pub track: TrackWithArtist,
}

#[derive(Insertable)]
#[diesel(table_name = weekly_submissions)]
pub struct NewSubmission<'a> {
    pub user_id: i32,
    pub track_id: i32,
    pub week_key: String,
    pub category: &'a str,
    pub note: Option<&'a str>,
}

impl<'a> NewSubmission<'a> {
    #[must_use]
    pub fn new(
        user_id: i32,
        track_id: i32,
        week: WeekKey,
        category: &'a str,
        note: Option<&'a str>,
    ) -> Self {
        Self {
            user_id,
            track_id,
            week_key: week.to_string(),
            category,
            note,
        }
    }

    /// # Errors
    /// Fails with a unique violation if the user already submitted for this week and category.
    pub async fn insert(&self, conn: &mut AsyncPgConnection) -> QueryResult<WeeklySubmission> {
        diesel::insert_into(weekly_submissions::table)
            .values(self)
            .get_result(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    #[tokio::test]
    async fn review_keeps_the_submitter_note() {
        let Some(mut conn) = test_db::connection().await else {
            return;
        };
        let artist = test_db::user("submitter", &mut conn).await;
        let moderator = test_db::user("reviewer", &mut conn).await;
        let track = test_db::track("Fresh Cut", "Submitter", &mut conn).await;

        let submission = NewSubmission::new(
            artist.id,
            track.id,
            WeekKey::current(),
            "fresh",
            Some("First single"),
        )
        .insert(&mut conn)
        .await
        .unwrap();
        assert!(submission.is_pending());

        let reviewed = submission
            .review(false, moderator.id, Some("Audio clips"), &mut conn)
            .await
            .unwrap();
        assert_eq!(reviewed.status, SubmissionStatus::Rejected);
        assert_eq!(reviewed.note.as_deref(), Some("First single"));
        assert_eq!(reviewed.review_note.as_deref(), Some("Audio clips"));
        assert_eq!(reviewed.reviewed_by, Some(moderator.id));

        assert!(matches!(
            submission.review(true, moderator.id, None, &mut conn).await,
            Err(diesel::result::Error::NotFound)
        ));
    }
}
