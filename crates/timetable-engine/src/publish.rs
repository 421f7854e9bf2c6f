//! Per-(week, audience) publish flag gating what non-privileged readers see.
//!
//! Each (year, week, audience) is either Unpublished (the initial state) or
//! Published. Both transitions are idempotent: publishing a published week is
//! a successful no-op that leaves the stored record untouched. Student and
//! teacher audiences are independent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::IsoWeek;
use crate::error::Result;
use crate::model::{Access, Actor, Audience};
use crate::store::PublishStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishState {
    Unpublished,
    Published,
}

impl PublishState {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishState::Published)
    }
}

/// The last transition of one (week, audience).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub week: IsoWeek,
    pub audience: Audience,
    pub published: bool,
    pub actor: Actor,
    pub changed_at: DateTime<Utc>,
}

/// Both audience flags of one week.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStatus {
    pub student: bool,
    pub teacher: bool,
}

impl PublishStatus {
    pub fn is_published(&self, audience: Audience) -> bool {
        match audience {
            Audience::Student => self.student,
            Audience::Teacher => self.teacher,
        }
    }
}

/// Outcome of a publish or unpublish call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// The record now in effect.
    pub record: PublishRecord,
    /// The record before the call, if the week had ever been touched.
    pub previous: Option<PublishRecord>,
    /// False when the call was a no-op.
    pub changed: bool,
}

pub struct PublishStateMachine<'a> {
    store: &'a dyn PublishStore,
}

impl<'a> PublishStateMachine<'a> {
    pub fn new(store: &'a dyn PublishStore) -> Self {
        Self { store }
    }

    pub fn state(&self, week: IsoWeek, audience: Audience) -> Result<PublishState> {
        let published = self
            .store
            .record(week, audience)?
            .is_some_and(|r| r.published);
        Ok(if published {
            PublishState::Published
        } else {
            PublishState::Unpublished
        })
    }

    pub fn status(&self, week: IsoWeek) -> Result<PublishStatus> {
        Ok(self.store.get_status(week)?)
    }

    pub fn publish(
        &self,
        week: IsoWeek,
        audience: Audience,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        self.transition(week, audience, true, actor, now)
    }

    pub fn unpublish(
        &self,
        week: IsoWeek,
        audience: Audience,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        self.transition(week, audience, false, actor, now)
    }

    /// Whether a reader with `access` may see `audience`'s view of `week`.
    /// Privileged readers always may.
    pub fn is_visible(&self, access: Access, week: IsoWeek, audience: Audience) -> Result<bool> {
        match access {
            Access::Privileged => Ok(true),
            Access::Public => Ok(self.state(week, audience)?.is_published()),
        }
    }

    fn transition(
        &self,
        week: IsoWeek,
        audience: Audience,
        published: bool,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let candidate = PublishRecord {
            week,
            audience,
            published,
            actor: actor.clone(),
            changed_at: now,
        };
        let previous = self.store.set_status(&candidate)?;
        let changed = previous.as_ref().is_some_and(|r| r.published) != published;

        if !changed {
            debug!(week = %week, audience = %audience, published, "publish state unchanged");
            return Ok(Transition {
                record: previous.clone().unwrap_or(candidate),
                previous,
                changed: false,
            });
        }
        Ok(Transition {
            record: candidate,
            previous,
            changed: true,
        })
    }
}
