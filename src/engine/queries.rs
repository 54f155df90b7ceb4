use futures::future::join_all;
use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::{Actor, Engine, EngineError};

#[derive(Debug, Clone, Copy, Default)]
pub struct BookingFilter {
    pub space_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

impl Engine {
    pub async fn find_space(&self, id: &Ulid) -> Option<Space> {
        let ss = self.get_space_state(id)?;
        let guard = ss.read().await;
        Some(guard.space.clone())
    }

    pub async fn list_spaces(&self) -> Vec<Space> {
        let states: Vec<_> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut spaces: Vec<Space> = join_all(states.iter().map(|ss| async move {
            ss.read().await.space.clone()
        }))
        .await;
        spaces.sort_by_key(|s| s.id);
        spaces
    }

    pub fn find_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    /// Users only see their own bookings; anything else reads as not found.
    pub async fn get_booking(&self, actor: Actor, id: Ulid) -> Result<Booking, EngineError> {
        let space_id = self
            .booking_to_space
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking", id))?;
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound("booking", id))?;
        let guard = ss.read().await;
        match guard.booking(id) {
            Some(b) if actor == Actor::Admin || actor == Actor::User(b.user_id) => Ok(b.clone()),
            _ => Err(EngineError::NotFound("booking", id)),
        }
    }

    /// Newest first. Users get their own bookings only.
    pub async fn list_bookings(&self, actor: Actor, filter: BookingFilter) -> Vec<Booking> {
        let states: Vec<_> = match filter.space_id {
            Some(id) => self.get_space_state(&id).into_iter().collect(),
            None => self.spaces.iter().map(|e| e.value().clone()).collect(),
        };
        let per_space = join_all(states.iter().map(|ss| async move {
            let guard = ss.read().await;
            guard
                .bookings
                .iter()
                .filter(|b| match actor {
                    Actor::Admin => true,
                    Actor::User(uid) => b.user_id == uid,
                })
                .filter(|b| filter.status.is_none_or(|s| b.status == s))
                .cloned()
                .collect::<Vec<_>>()
        }))
        .await;
        let mut bookings: Vec<Booking> = per_space.into_iter().flatten().collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        bookings
    }

    /// Bookings still holding `space_id` somewhere in `[from, to)`, by start time.
    pub async fn space_schedule(
        &self,
        space_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Booking>, EngineError> {
        if from > to {
            return Err(EngineError::InvalidRange { from, to });
        }
        if to - from > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound("space", space_id))?;
        let guard = ss.read().await;
        Ok(guard
            .overlapping(&Span::new(from, to))
            .filter(|b| b.holds_space())
            .cloned()
            .collect())
    }
}
