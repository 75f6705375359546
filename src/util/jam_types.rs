use std::{fmt, str::FromStr};

use diesel::{
    backend::Backend,
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::Pg,
    serialize::{self, Output, ToSql},
    sql_types::SmallInt,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use utoipa::ToSchema;

/// Wires a `#[repr(i16)]` enum to an `int2` column.
macro_rules! small_int_enum_sql {
    ($ty:ty) => {
        impl ToSql<SmallInt, Pg> for $ty
        where
            i16: ToSql<SmallInt, Pg>,
        {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                let v = i16::from(*self);
                <i16 as ToSql<SmallInt, Pg>>::to_sql(&v, &mut out.reborrow())
            }
        }

        impl<DB> FromSql<SmallInt, DB> for $ty
        where
            DB: Backend,
            i16: FromSql<SmallInt, DB>,
        {
            fn from_sql(bytes: DB::RawValue<'_>) -> deserialize::Result<Self> {
                let num = i16::from_sql(bytes)?;
                Ok(Self::try_from(num)?)
            }
        }
    };
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize_repr,
    Deserialize_repr,
    AsExpression,
    FromSqlRow,
    ToSchema,
)]
#[diesel(sql_type = SmallInt)]
#[repr(i16)]
pub enum AccountType {
    User = 0,
    Artist = 1,
    Moderator = 2,
    Team = 3,
}

impl AccountType {
    /// Moderators and team members can review submissions, refresh charts and remove content.
    #[must_use]
    pub const fn is_staff(self) -> bool {
        matches!(self, Self::Moderator | Self::Team)
    }
}

impl FromStr for AccountType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "artist" => Ok(Self::Artist),
            "moderator" => Ok(Self::Moderator),
            "team" => Ok(Self::Team),
            other => Err(anyhow::anyhow!("unknown account type {other:?}")),
        }
    }
}

small_int_enum_sql!(AccountType);

/// Where a track's audio and metadata come from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize_repr,
    Deserialize_repr,
    AsExpression,
    FromSqlRow,
    ToSchema,
)]
#[diesel(sql_type = SmallInt)]
#[repr(i16)]
pub enum TrackSource {
    Local = 0,
    Jamendo = 1,
    LastFm = 2,
}

small_int_enum_sql!(TrackSource);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize_repr,
    Deserialize_repr,
    AsExpression,
    FromSqlRow,
    ToSchema,
)]
#[diesel(sql_type = SmallInt)]
#[repr(i16)]
pub enum SubmissionStatus {
    Pending = 0,
    Approved = 1,
    Rejected = 2,
}

small_int_enum_sql!(SubmissionStatus);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize_repr,
    Deserialize_repr,
    AsExpression,
    FromSqlRow,
    ToSchema,
)]
#[diesel(sql_type = SmallInt)]
#[repr(i16)]
pub enum ActivityKind {
    LikedTrack = 0,
    FollowedUser = 1,
    CreatedPlaylist = 2,
    SubmittedTrack = 3,
    TippedArtist = 4,
    UploadedTrack = 5,
    ImportedTrack = 6,
}

impl ActivityKind {
    /// Name used as the SSE event type.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::LikedTrack => "likedTrack",
            Self::FollowedUser => "followedUser",
            Self::CreatedPlaylist => "createdPlaylist",
            Self::SubmittedTrack => "submittedTrack",
            Self::TippedArtist => "tippedArtist",
            Self::UploadedTrack => "uploadedTrack",
            Self::ImportedTrack => "importedTrack",
        }
    }
}

small_int_enum_sql!(ActivityKind);

/// Weekly chart categories. Submissions are filed under one of these too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChartCategory {
    /// Tracks ranked by plays in the week
    Streams,
    /// Tracks ranked by likes received in the week
    Likes,
    /// Approved submissions ranked by plays in the week
    Fresh,
}

impl ChartCategory {
    pub const ALL: [Self; 3] = [Self::Streams, Self::Likes, Self::Fresh];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Streams => "streams",
            Self::Likes => "likes",
            Self::Fresh => "fresh",
        }
    }
}

impl fmt::Display for ChartCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown chart category {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_type_round_trips_through_i16() {
        assert_eq!(AccountType::try_from(2i16).unwrap(), AccountType::Moderator);
        assert_eq!(i16::from(AccountType::Team), 3);
        assert!(AccountType::try_from(9i16).is_err());
    }

    #[test]
    fn only_moderators_and_team_are_staff() {
        assert!(!AccountType::User.is_staff());
        assert!(!AccountType::Artist.is_staff());
        assert!(AccountType::Moderator.is_staff());
        assert!(AccountType::Team.is_staff());
    }

    #[test]
    fn enums_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&TrackSource::Jamendo).unwrap(), "1");
        assert_eq!(
            serde_json::from_str::<SubmissionStatus>("2").unwrap(),
            SubmissionStatus::Rejected
        );
    }

    #[test]
    fn chart_category_parses_lowercase_names() {
        assert_eq!("fresh".parse::<ChartCategory>().unwrap(), ChartCategory::Fresh);
        assert!("Fresh".parse::<ChartCategory>().is_err());
        assert_eq!(
            serde_json::to_string(&ChartCategory::Streams).unwrap(),
            "\"streams\""
        );
    }
}
