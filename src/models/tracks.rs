use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::artists::Artist;
use crate::{
    schema::{track_likes, tracks},
    util::jam_types::TrackSource,
};

#[derive(
    Queryable, Selectable, Identifiable, Associations, Serialize, Debug, Clone, PartialEq, Eq, ToSchema,
)]
#[diesel(belongs_to(Artist))]
#[diesel(table_name = tracks, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: i32,
    pub title: String,
    pub artist_id: i32,
    pub album: Option<String>,
    pub duration_secs: Option<i32>,
    pub audio_url: Option<String>,
    pub cover_url: Option<String>,
    pub source: TrackSource,
    /// The provider's ID for imported tracks
    pub external_id: Option<String>,
    pub uploaded_by: Option<i32>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

impl Track {
    /// Whether the user may delete this track: the uploader or staff.
    #[must_use]
    pub fn user_can_delete(&self, user_id: i32, is_staff: bool) -> bool {
        is_staff || self.uploaded_by == Some(user_id)
    }

    /// Number of likes on this track.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn like_count(&self, conn: &mut AsyncPgConnection) -> QueryResult<i64> {
        track_likes::table
            .filter(track_likes::track_id.eq(self.id))
            .count()
            .get_result(conn)
            .await
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackWithArtist {
    #[serde(flatten)]
    pub track: Track,
    pub artist: Artist,
}

impl From<(Track, Artist)> for TrackWithArtist {
    fn from((track, artist): (Track, Artist)) -> Self {
        Self { track, artist }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = tracks)]
pub struct NewTrack<'a> {
    pub title: &'a str,
    pub artist_id: i32,
    pub album: Option<&'a str>,
    pub duration_secs: Option<i32>,
    pub audio_url: Option<&'a str>,
    pub cover_url: Option<&'a str>,
    pub source: TrackSource,
    pub external_id: Option<&'a str>,
    pub uploaded_by: Option<i32>,
}

impl NewTrack<'_> {
    /// Inserts the track.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn insert(&self, conn: &mut AsyncPgConnection) -> QueryResult<Track> {
        diesel::insert_into(tracks::table)
            .values(self)
            .get_result(conn)
            .await
    }

    /// Inserts an imported track, or returns the row already imported from the same provider ID.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn insert_or_existing(&self, conn: &mut AsyncPgConnection) -> QueryResult<Track> {
        let inserted: Option<Track> = diesel::insert_into(tracks::table)
            .values(self)
            .on_conflict((tracks::source, tracks::external_id))
            .do_nothing()
            .get_result(conn)
            .await
            .optional()?;

        match inserted {
            Some(track) => Ok(track),
            None => {
                tracks::table
                    .filter(tracks::source.eq(self.source))
                    .filter(tracks::external_id.eq(self.external_id))
                    .first(conn)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(uploaded_by: Option<i32>) -> Track {
        Track {
            id: 1,
            title: "Night Drive".to_owned(),
            artist_id: 1,
            album: None,
            duration_secs: Some(201),
            audio_url: None,
            cover_url: None,
            source: TrackSource::Local,
            external_id: None,
            uploaded_by,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn uploader_can_delete() {
        assert!(track(Some(4)).user_can_delete(4, false));
    }

    #[test]
    fn strangers_cannot_delete() {
        assert!(!track(Some(4)).user_can_delete(5, false));
        assert!(!track(None).user_can_delete(5, false));
    }

    #[test]
    fn staff_can_delete_anything() {
        assert!(track(None).user_can_delete(5, true));
    }
}
