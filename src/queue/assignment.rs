//! Picking players from the queue and splitting them into two teams.
use std::collections::HashSet;

use crate::errors::ServiceError;

use super::models::{EntryStatus, QueueEntry};

/// Entry ids of both sides of a match
#[derive(Debug, Clone, PartialEq)]
pub struct Teams {
    pub one: Vec<i64>,
    pub two: Vec<i64>,
}

impl Teams {
    pub fn entry_ids(&self) -> Vec<i64> {
        self.one.iter().chain(self.two.iter()).copied().collect()
    }
}

fn invalid(message: &str) -> ServiceError {
    ServiceError::InvalidTeamAssignment(message.to_string())
}

fn status_rank(entry: &QueueEntry) -> u8 {
    match entry.status() {
        Ok(EntryStatus::Waiting) => 0,
        Ok(EntryStatus::Playing) => 1,
        _ => 2,
    }
}

/// Waiting players first, the ones that played the least and waited the longest up front
pub fn queue_order(entries: &mut Vec<QueueEntry>) {
    entries.sort_by(|a, b| {
        status_rank(a)
            .cmp(&status_rank(b))
            .then(a.games_played.cmp(&b.games_played))
            .then(a.queued_at.cmp(&b.queued_at))
            .then(a.id.cmp(&b.id))
    });
}

/// Take the next players from the queue and balance them over two teams
///
/// Players are drafted strongest first, snake style: with four players the
/// first and the last pick form one team.
pub fn pick_teams(entries: &[QueueEntry], players_per_team: usize) -> Result<Teams, ServiceError> {
    let mut waiting: Vec<QueueEntry> = entries
        .iter()
        .filter(|entry| entry.is_waiting())
        .cloned()
        .collect();
    queue_order(&mut waiting);

    let needed = players_per_team * 2;
    if players_per_team == 0 || waiting.len() < needed {
        return Err(invalid(&format!(
            "{} waiting players are needed, only {} are waiting",
            needed,
            waiting.len()
        )));
    }

    let mut picked: Vec<&QueueEntry> = waiting.iter().take(needed).collect();
    // stable, so equal levels keep their queue order
    picked.sort_by_key(|entry| -entry.level().weight());

    let mut teams = Teams {
        one: Vec::with_capacity(players_per_team),
        two: Vec::with_capacity(players_per_team),
    };

    for (pick, entry) in picked.iter().enumerate() {
        let round = pick / 2;
        let first_of_round = pick % 2 == 0;

        if first_of_round == (round % 2 == 0) {
            teams.one.push(entry.id);
        } else {
            teams.two.push(entry.id);
        }
    }

    Ok(teams)
}

/// Verify teams chosen by hand
pub fn check_teams(
    entries: &[QueueEntry],
    team_one: &[i64],
    team_two: &[i64],
    players_per_team: usize,
) -> Result<Teams, ServiceError> {
    if team_one.len() != players_per_team || team_two.len() != players_per_team {
        return Err(invalid(&format!(
            "each team needs exactly {} players",
            players_per_team
        )));
    }

    let mut seen = HashSet::new();
    for entry_id in team_one.iter().chain(team_two.iter()) {
        if !seen.insert(*entry_id) {
            return Err(invalid(&format!("entry {} is picked more than once", entry_id)));
        }

        let entry = entries
            .iter()
            .find(|entry| entry.id == *entry_id)
            .ok_or_else(|| invalid(&format!("entry {} is not part of this session", entry_id)))?;

        if !entry.is_waiting() {
            return Err(invalid(&format!(
                "entry {} is not waiting in the queue",
                entry_id
            )));
        }
    }

    Ok(Teams {
        one: team_one.to_vec(),
        two: team_two.to_vec(),
    })
}
