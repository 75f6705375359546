use std::collections::HashSet;

use diesel::prelude::*;
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::{
    artists::Artist,
    tracks::{Track, TrackWithArtist},
};
use crate::schema::{artists, tracks, user_playlist_tracks, user_playlists};

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = user_playlists, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct UserPlaylist {
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub updated_at: OffsetDateTime,
}

impl UserPlaylist {
    #[must_use]
    pub fn visible_to(&self, user_id: Option<i32>) -> bool {
        self.is_public || user_id == Some(self.owner_id)
    }

    /// Tracks in playlist order.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn entries(&self, conn: &mut AsyncPgConnection) -> QueryResult<Vec<PlaylistEntry>> {
        Ok(user_playlist_tracks::table
            .inner_join(tracks::table.inner_join(artists::table))
            .filter(user_playlist_tracks::playlist_id.eq(self.id))
            .order(user_playlist_tracks::position.asc())
            .select((
                UserPlaylistTrack::as_select(),
                Track::as_select(),
                Artist::as_select(),
            ))
            .load::<(UserPlaylistTrack, Track, Artist)>(conn)
            .await?
            .into_iter()
            .map(|(entry, track, artist)| PlaylistEntry {
                position: entry.position,
                added_at: entry.added_at,
                track: TrackWithArtist { track, artist },
            })
            .collect())
    }

    /// Appends a track at the end of the playlist.
    ///
    /// # Errors
    /// Fails with a unique violation if the track is already in the playlist.
    pub async fn append_track(
        &self,
        new_track_id: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<UserPlaylistTrack> {
        let target = self.id;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                use crate::schema::user_playlist_tracks::dsl::*;

                lock_playlist(target, conn).await?;

                let last: Option<i32> = user_playlist_tracks
                    .filter(playlist_id.eq(target))
                    .select(diesel::dsl::max(position))
                    .first(conn)
                    .await?;

                let entry = diesel::insert_into(user_playlist_tracks)
                    .values((
                        playlist_id.eq(target),
                        track_id.eq(new_track_id),
                        position.eq(last.map_or(0, |p| p + 1)),
                    ))
                    .get_result(conn)
                    .await?;
                touch(target, conn).await?;
                Ok(entry)
            }
            .scope_boxed()
        })
        .await
    }

    /// Removes a track and closes the gap it leaves.
    ///
    /// # Errors
    /// Fails with `NotFound` if the track isn't in the playlist.
    pub async fn remove_track(
        &self,
        removed_track_id: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<()> {
        let target = self.id;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                use crate::schema::user_playlist_tracks::dsl::*;

                lock_playlist(target, conn).await?;

                let removed_position: i32 = diesel::delete(
                    user_playlist_tracks
                        .filter(playlist_id.eq(target))
                        .filter(track_id.eq(removed_track_id)),
                )
                .returning(position)
                .get_result(conn)
                .await?;

                diesel::update(
                    user_playlist_tracks
                        .filter(playlist_id.eq(target))
                        .filter(position.gt(removed_position)),
                )
                .set(position.eq(position - 1))
                .execute(conn)
                .await?;
                touch(target, conn).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    /// Puts the tracks in the given order.
    ///
    /// # Returns
    /// `false` without changing anything if `order` isn't a permutation of the playlist's tracks.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn reorder(&self, order: &[i32], conn: &mut AsyncPgConnection) -> QueryResult<bool> {
        let target = self.id;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                use crate::schema::user_playlist_tracks::dsl::*;

                lock_playlist(target, conn).await?;

                let current: Vec<i32> = user_playlist_tracks
                    .filter(playlist_id.eq(target))
                    .select(track_id)
                    .load(conn)
                    .await?;
                if !is_permutation(&current, order) {
                    return Ok(false);
                }

                for (new_position, moved_track) in (0i32..).zip(order) {
                    diesel::update(
                        user_playlist_tracks
                            .filter(playlist_id.eq(target))
                            .filter(track_id.eq(moved_track)),
                    )
                    .set(position.eq(new_position))
                    .execute(conn)
                    .await?;
                }
                touch(target, conn).await?;
                Ok(true)
            }
            .scope_boxed()
        })
        .await
    }
}

/// Serializes concurrent edits of the same playlist.
async fn lock_playlist(target: i32, conn: &mut AsyncPgConnection) -> QueryResult<i32> {
    user_playlists::table
        .find(target)
        .select(user_playlists::id)
        .for_update()
        .first(conn)
        .await
}

async fn touch(target: i32, conn: &mut AsyncPgConnection) -> QueryResult<usize> {
    diesel::update(user_playlists::table.find(target))
        .set(user_playlists::updated_at.eq(OffsetDateTime::now_utc()))
        .execute(conn)
        .await
}

/// True if `requested` holds exactly the tracks in `current`, each once.
#[must_use]
pub fn is_permutation(current: &[i32], requested: &[i32]) -> bool {
    if current.len() != requested.len() {
        return false;
    }
    let current: HashSet<i32> = current.iter().copied().collect();
    let mut seen = HashSet::with_capacity(requested.len());
    requested
        .iter()
        .all(|id| current.contains(id) && seen.insert(*id))
}

#[derive(Queryable, Selectable, Identifiable, Associations, Serialize, Debug, ToSchema)]
#[diesel(belongs_to(UserPlaylist, foreign_key = playlist_id))]
#[diesel(table_name = user_playlist_tracks, check_for_backend(diesel::pg::Pg))]
#[diesel(primary_key(playlist_id, track_id))]
#[serde(rename_all = "camelCase")]
pub struct UserPlaylistTrack {
    pub playlist_id: i32,
    pub track_id: i32,
    pub position: i32,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub added_at: OffsetDateTime,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntry {
    pub position: i32,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub added_at: OffsetDateTime,
    pub track: TrackWithArtist,
}

#[derive(Insertable)]
#[diesel(table_name = user_playlists)]
pub struct NewPlaylist<'a> {
    pub owner_id: i32,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub is_public: bool,
}

impl NewPlaylist<'_> {
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn insert(&self, conn: &mut AsyncPgConnection) -> QueryResult<UserPlaylist> {
        diesel::insert_into(user_playlists::table)
            .values(self)
            .get_result(conn)
            .await
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = user_playlists)]
pub struct PlaylistChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub updated_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    async fn positions(playlist: &UserPlaylist, conn: &mut AsyncPgConnection) -> Vec<(i32, i32)> {
        playlist
            .entries(conn)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| (entry.position, entry.track.track.id))
            .collect()
    }

    #[tokio::test]
    async fn positions_stay_contiguous_after_removal() {
        let Some(mut conn) = test_db::connection().await else {
            return;
        };
        let owner = test_db::user("curator", &mut conn).await;
        let playlist = NewPlaylist {
            owner_id: owner.id,
            name: "Commute",
            description: None,
            is_public: true,
        }
        .insert(&mut conn)
        .await
        .unwrap();

        let mut ids = Vec::new();
        for title in ["One", "Two", "Three", "Four"] {
            let track = test_db::track(title, "Tapes", &mut conn).await;
            let entry = playlist.append_track(track.id, &mut conn).await.unwrap();
            assert_eq!(entry.position, i32::try_from(ids.len()).unwrap());
            ids.push(track.id);
        }

        playlist.remove_track(ids[1], &mut conn).await.unwrap();
        assert_eq!(
            positions(&playlist, &mut conn).await,
            vec![(0, ids[0]), (1, ids[2]), (2, ids[3])]
        );

        playlist.remove_track(ids[0], &mut conn).await.unwrap();
        assert_eq!(
            positions(&playlist, &mut conn).await,
            vec![(0, ids[2]), (1, ids[3])]
        );

        assert!(matches!(
            playlist.remove_track(ids[1], &mut conn).await,
            Err(diesel::result::Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn reorder_rejects_foreign_tracks_and_keeps_order() {
        let Some(mut conn) = test_db::connection().await else {
            return;
        };
        let owner = test_db::user("sorter", &mut conn).await;
        let playlist = NewPlaylist {
            owner_id: owner.id,
            name: "Sorted",
            description: None,
            is_public: false,
        }
        .insert(&mut conn)
        .await
        .unwrap();
        let first = test_db::track("First", "Tapes", &mut conn).await;
        let second = test_db::track("Second", "Tapes", &mut conn).await;
        playlist.append_track(first.id, &mut conn).await.unwrap();
        playlist.append_track(second.id, &mut conn).await.unwrap();

        assert!(!playlist.reorder(&[second.id], &mut conn).await.unwrap());
        assert!(playlist
            .reorder(&[second.id, first.id], &mut conn)
            .await
            .unwrap());
        assert_eq!(
            positions(&playlist, &mut conn).await,
            vec![(0, second.id), (1, first.id)]
        );
    }

    #[test]
    fn same_tracks_in_new_order_is_a_permutation() {
        assert!(is_permutation(&[1, 2, 3], &[3, 1, 2]));
        assert!(is_permutation(&[], &[]));
    }

    #[test]
    fn missing_or_extra_tracks_are_rejected() {
        assert!(!is_permutation(&[1, 2, 3], &[1, 2]));
        assert!(!is_permutation(&[1, 2], &[1, 2, 4]));
        assert!(!is_permutation(&[1, 2, 3], &[1, 2, 4]));
    }

    #[test]
    fn duplicates_are_rejected() {
        assert!(!is_permutation(&[1, 2, 3], &[1, 1, 2]));
    }

    #[test]
    fn private_playlists_are_owner_only() {
        let playlist = UserPlaylist {
            id: 1,
            owner_id: 9,
            name: "late night".to_owned(),
            description: None,
            is_public: false,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(playlist.visible_to(Some(9)));
        assert!(!playlist.visible_to(Some(3)));
        assert!(!playlist.visible_to(None));
    }
}
