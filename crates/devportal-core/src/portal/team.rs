//! Choosing the active team.
//!
//! Resolution precedence:
//! 1. an override matching a team id or the current member's team-member id
//! 2. an override matching a team name
//! 3. the only team, when there is exactly one
//! 4. an operator choice from an enumerated list
//!
//! Steps 1-3 are [`resolve_team`]; step 4 is [`parse_selection`] plus the thin
//! I/O loop in [`prompt_for_team`].

use std::io::{self, BufRead, Write};

use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::portal::error::ClientError;
use crate::portal::models::Team;

/// Explicit team choice supplied by configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Team selection overrides")]
pub struct TeamOverrides {
    /// Team id, or the team-member id of the current user in that team.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Exact team name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TeamOverrides {
    fn trimmed_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn trimmed_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Outcome of non-interactive resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The team id to use.
    Resolved(String),
    /// Several teams and no usable override: ask the operator.
    Prompt,
}

/// Outcome of reading one line of operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// 0-based index into the team list.
    Selected(usize),
    /// Input was not a valid choice; show the list again.
    Reprompt,
}

/// Resolve the team without operator input.
///
/// # Errors
///
/// Returns [`ClientError::NoTeams`] if `teams` is empty.
pub fn resolve_team(teams: &[Team], overrides: &TeamOverrides) -> Result<Resolution, ClientError> {
    if teams.is_empty() {
        return Err(ClientError::NoTeams);
    }

    if let Some(wanted) = overrides.trimmed_id() {
        let found = teams.iter().find(|team| {
            team.team_id.trim() == wanted
                || team
                    .current_team_member
                    .team_member_id
                    .as_deref()
                    .is_some_and(|id| id.trim() == wanted)
        });
        if let Some(team) = found {
            return Ok(Resolution::Resolved(team.team_id.clone()));
        }
        warn!("couldn't find team with id '{wanted}'");
    }

    if let Some(wanted) = overrides.trimmed_name() {
        if let Some(team) = teams.iter().find(|team| team.name.trim() == wanted) {
            return Ok(Resolution::Resolved(team.team_id.clone()));
        }
        warn!("couldn't find team with name '{wanted}'");
    }

    if let [only] = teams {
        return Ok(Resolution::Resolved(only.team_id.clone()));
    }

    Ok(Resolution::Prompt)
}

/// Prompt lines, one per team: `<index>) <teamId> <name> (<type>)`.
#[must_use]
pub fn format_choices(teams: &[Team]) -> Vec<String> {
    teams
        .iter()
        .enumerate()
        .map(|(i, team)| format!("{}) {} {} ({})", i + 1, team.team_id, team.name, team.team_type))
        .collect()
}

/// Interpret one line of operator input as a 1-based team choice.
#[must_use]
pub fn parse_selection(teams: &[Team], input: &str) -> Selection {
    match input.trim().parse::<usize>() {
        Ok(n) if (1..=teams.len()).contains(&n) => Selection::Selected(n - 1),
        _ => Selection::Reprompt,
    }
}

/// Ask the operator to pick a team, re-prompting until the input is valid.
///
/// # Errors
///
/// Returns an I/O error if writing fails or input ends before a valid choice.
pub fn prompt_for_team<R: BufRead, W: Write>(
    teams: &[Team],
    mut input: R,
    mut output: W,
) -> io::Result<String> {
    loop {
        writeln!(
            output,
            "Multiple teams found, please enter the number of the team you want to use: "
        )?;
        for line in format_choices(teams) {
            writeln!(output, "{line}")?;
        }
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no team selected before end of input",
            ));
        }

        if let Selection::Selected(index) = parse_selection(teams, &line) {
            return Ok(teams[index].team_id.clone());
        }
    }
}
