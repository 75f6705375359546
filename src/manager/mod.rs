use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::{info, instrument};

use crate::{
    models::{rankings::RankingSnapshot, tracks::Track},
    util::{
        jam_types::{AccountType, ChartCategory, TrackSource},
        jobs::TranscodeJob,
        live::{LiveEvent, CHARTS_CHANNEL},
        week::WeekKey,
    },
    AppState,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Recompute this week's charts. Without a category, all of them.
    RefreshCharts {
        #[clap(value_parser = parse_category)]
        category: Option<ChartCategory>,
    },
    /// Promote or demote a user (user, artist, moderator, team)
    SetAccountType {
        user_id: i32,
        #[clap(value_parser = parse_account_type)]
        account_type: AccountType,
    },
    DeleteTrack {
        id_to_delete: i32,
    },
    /// Push a new transcode job for an uploaded track
    RequeueTranscode {
        track_id: i32,
    },
}

fn parse_category(s: &str) -> anyhow::Result<ChartCategory> {
    s.parse()
}

fn parse_account_type(s: &str) -> anyhow::Result<AccountType> {
    s.parse()
}

//skip state because it has members that don't implement Debug
#[instrument(name = "cli_command", skip(state))]
pub async fn parse_command(command: &Command, state: AppState) -> anyhow::Result<()> {
    match command {
        Command::RefreshCharts { category } => {
            let mut conn = state.db.get().await?;
            let week = WeekKey::current();
            let categories = category.map_or_else(|| ChartCategory::ALL.to_vec(), |c| vec![c]);

            for category in categories {
                let snapshot =
                    RankingSnapshot::refresh(category, week, state.config.charts.size, &mut conn)
                        .await?;
                // Only subscribers of this process would see it, but keep the path identical
                state
                    .live
                    .publish(CHARTS_CHANNEL, LiveEvent::new("chartRefreshed", &snapshot)?);
                info!(%category, %week, snapshot_id = snapshot.id, "Chart refreshed");
            }
            Ok(())
        }
        Command::SetAccountType {
            user_id,
            account_type: new_type,
        } => {
            use crate::schema::users::dsl::*;

            let mut conn = state.db.get().await?;
            let updated = diesel::update(users.find(*user_id))
                .set(account_type.eq(*new_type))
                .execute(&mut conn)
                .await?;
            if updated == 0 {
                return Err(anyhow!("No user with ID {user_id}"));
            }
            info!(user_id, ?new_type, "Account type changed");
            Ok(())
        }
        Command::DeleteTrack { id_to_delete } => {
            use crate::schema::tracks::dsl::*;

            let mut conn = state.db.get().await?;
            let deleted = diesel::delete(tracks.find(*id_to_delete))
                .execute(&mut conn)
                .await?;
            if deleted == 0 {
                return Err(anyhow!("No track with ID {id_to_delete}"));
            }
            info!(track_id = id_to_delete, "Track deleted");
            Ok(())
        }
        Command::RequeueTranscode { track_id } => {
            use crate::schema::tracks::dsl::*;

            let mut conn = state.db.get().await?;
            let track = tracks
                .find(*track_id)
                .first::<Track>(&mut conn)
                .await
                .optional()?
                .ok_or_else(|| anyhow!("No track with ID {track_id}"))?;
            if track.source != TrackSource::Local {
                return Err(anyhow!("Track {track_id} was imported, not uploaded"));
            }
            let key = track
                .external_id
                .as_deref()
                .context("Uploaded track has no object key")?;

            // The job is credited to the uploader, not whoever ran the command
            let requested_by = track.uploaded_by.unwrap_or_default();
            TranscodeJob::new(track.id, key, requested_by)
                .enqueue(&state.redis)
                .await?;
            Ok(())
        }
    }
}
