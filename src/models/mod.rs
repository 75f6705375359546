pub mod activities;
pub mod artists;
pub mod follows;
pub mod likes;
pub mod playlists;
pub mod rankings;
pub mod stream_events;
pub mod submissions;
pub mod tips;
pub mod tracks;
pub mod users;

/// Postgres-backed test fixtures. Every connection sits in a transaction that's never committed.
#[cfg(test)]
pub(crate) mod test_db {
    use std::sync::LazyLock;

    use diesel_async::{AsyncConnection, AsyncPgConnection};
    use tokio::sync::OnceCell;

    use super::{
        artists::{Artist, NewArtist},
        tracks::{NewTrack, Track},
        users::{NewUser, User},
    };
    use crate::util::jam_types::TrackSource;

    static MIGRATED: LazyLock<OnceCell<()>> = LazyLock::new(OnceCell::new);

    /// `None` unless `JAMFIND_TEST_DATABASE_URL` points at a Postgres database tests may migrate.
    pub async fn connection() -> Option<AsyncPgConnection> {
        let url = std::env::var("JAMFIND_TEST_DATABASE_URL").ok()?;
        MIGRATED
            .get_or_try_init(|| crate::migrate(url.clone()))
            .await
            .expect("test database should migrate");

        let mut conn = AsyncPgConnection::establish(&url)
            .await
            .expect("test database should accept connections");
        conn.begin_test_transaction()
            .await
            .expect("test transaction should begin");
        Some(conn)
    }

    pub async fn user(name: &str, conn: &mut AsyncPgConnection) -> User {
        let email = format!("{name}@jamfind.test");
        NewUser::new(name, &email, "not-a-real-hash", None)
            .insert(conn)
            .await
            .expect("user should insert")
    }

    pub async fn track(title: &str, artist_name: &str, conn: &mut AsyncPgConnection) -> Track {
        let artist: Artist = NewArtist::new(artist_name)
            .find_or_create(conn)
            .await
            .expect("artist should insert");
        NewTrack {
            title,
            artist_id: artist.id,
            album: None,
            duration_secs: Some(200),
            audio_url: None,
            cover_url: None,
            source: TrackSource::Local,
            external_id: None,
            uploaded_by: None,
        }
        .insert(conn)
        .await
        .expect("track should insert")
    }
}
