use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;
use utoipa::ToSchema;

use super::users::{PublicUser, User};
use crate::{
    schema::activities,
    util::{
        jam_types::ActivityKind,
        live::{user_channel, LiveEvent, LiveHub, ACTIVITY_CHANNEL},
    },
};

/// Something a user did, shown in their followers' feeds.
#[derive(Queryable, Selectable, Identifiable, Associations, Serialize, Debug, Clone, ToSchema)]
#[diesel(belongs_to(User))]
#[diesel(table_name = activities, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i32,
    pub user_id: i32,
    pub kind: ActivityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<i32>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivityWithUser {
    #[serde(flatten)]
    pub activity: Activity,
    pub user: PublicUser,
}

#[derive(Insertable, Debug, Clone, Copy)]
#[diesel(table_name = activities)]
pub struct NewActivity {
    pub user_id: i32,
    pub kind: ActivityKind,
    pub track_id: Option<i32>,
    pub playlist_id: Option<i32>,
    pub target_user_id: Option<i32>,
    pub artist_id: Option<i32>,
}

impl NewActivity {
    const fn bare(user_id: i32, kind: ActivityKind) -> Self {
        Self {
            user_id,
            kind,
            track_id: None,
            playlist_id: None,
            target_user_id: None,
            artist_id: None,
        }
    }

    #[must_use]
    pub const fn track(user_id: i32, kind: ActivityKind, track_id: i32) -> Self {
        let mut activity = Self::bare(user_id, kind);
        activity.track_id = Some(track_id);
        activity
    }

    #[must_use]
    pub const fn followed(user_id: i32, target_user_id: i32) -> Self {
        let mut activity = Self::bare(user_id, ActivityKind::FollowedUser);
        activity.target_user_id = Some(target_user_id);
        activity
    }

    #[must_use]
    pub const fn playlist(user_id: i32, playlist_id: i32) -> Self {
        let mut activity = Self::bare(user_id, ActivityKind::CreatedPlaylist);
        activity.playlist_id = Some(playlist_id);
        activity
    }

    #[must_use]
    pub const fn tipped(user_id: i32, artist_id: i32) -> Self {
        let mut activity = Self::bare(user_id, ActivityKind::TippedArtist);
        activity.artist_id = Some(artist_id);
        activity
    }

    /// Stores the activity and pushes it to live subscribers.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn record(
        &self,
        conn: &mut AsyncPgConnection,
        live: &LiveHub,
    ) -> QueryResult<Activity> {
        let activity: Activity = diesel::insert_into(activities::table)
            .values(self)
            .get_result(conn)
            .await?;

        match LiveEvent::new(activity.kind.event_name(), &activity) {
            Ok(event) => {
                live.publish(&user_channel(activity.user_id), event.clone());
                live.publish(ACTIVITY_CHANNEL, event);
            }
            Err(e) => warn!("Failed to serialize activity {}: {e}", activity.id),
        }

        Ok(activity)
    }

    /// Like [`Self::record`], but a failure is only logged.
    /// The action the activity describes already happened, so it shouldn't fail because of the feed.
    pub async fn record_or_warn(&self, conn: &mut AsyncPgConnection, live: &LiveHub) {
        if let Err(e) = self.record(conn, live).await {
            warn!(kind = ?self.kind, user_id = self.user_id, "Failed to record activity: {e}");
        }
    }
}
