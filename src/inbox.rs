//! The in-app notification feed: newest first, capped, persisted.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::MAX_NOTIFICATIONS;
use crate::model::*;
use crate::notify::{NotifyHub, ServiceEvent};
use crate::persist::Persister;
use crate::timer::TimerSet;
use crate::wal::Record;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxError {
    NotFound(Ulid),
}

impl fmt::Display for InboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboxError::NotFound(id) => write!(f, "notification not found: {id}"),
        }
    }
}

impl std::error::Error for InboxError {}

/// Every set field must match. `from` is inclusive, `until` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    pub kind: Option<NotificationKind>,
    pub category: Option<NotificationCategory>,
    pub priority: Option<NotificationPriority>,
    pub read: Option<bool>,
    pub from: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
    pub person_id: Option<PersonId>,
    pub event_id: Option<EventId>,
}

impl NotificationFilter {
    pub fn unread() -> Self {
        Self {
            read: Some(false),
            ..Self::default()
        }
    }

    pub fn matches(&self, n: &InAppNotification) -> bool {
        self.kind.is_none_or(|k| n.kind == k)
            && self.category.is_none_or(|c| n.category == c)
            && self.priority.is_none_or(|p| n.priority == p)
            && self.read.is_none_or(|r| n.read == r)
            && self.from.is_none_or(|t| n.timestamp >= t)
            && self.until.is_none_or(|t| n.timestamp < t)
            && self
                .person_id
                .as_ref()
                .is_none_or(|p| n.related_person_id.as_ref() == Some(p))
            && self
                .event_id
                .as_ref()
                .is_none_or(|e| n.related_event_id.as_ref() == Some(e))
    }
}

pub struct NotificationStore {
    notifications: RwLock<VecDeque<InAppNotification>>,
    snoozed: DashMap<Ulid, InAppNotification>,
    snooze_timers: TimerSet,
    clock: Arc<dyn Clock>,
    persister: Persister,
    hub: Arc<NotifyHub>,
    me: Weak<NotificationStore>,
}

impl NotificationStore {
    /// `initial` is newest first, as persisted. Anything past the cap is dropped.
    pub fn new(
        initial: Vec<InAppNotification>,
        clock: Arc<dyn Clock>,
        persister: Persister,
        hub: Arc<NotifyHub>,
    ) -> Arc<Self> {
        let mut notifications: VecDeque<_> = initial.into();
        notifications.truncate(MAX_NOTIFICATIONS);
        metrics::gauge!(crate::observability::NOTIFICATIONS_STORED).set(notifications.len() as f64);
        Arc::new_cyclic(|me| Self {
            notifications: RwLock::new(notifications),
            snoozed: DashMap::new(),
            snooze_timers: TimerSet::new(None),
            clock,
            persister,
            hub,
            me: me.clone(),
        })
    }

    /// Insert at the front, evicting the oldest past the cap.
    pub async fn add(&self, notification: InAppNotification) -> Ulid {
        let id = notification.id;
        let (snapshot, evicted) = {
            let mut list = self.notifications.write().await;
            list.push_front(notification);
            let mut evicted = Vec::new();
            while list.len() > MAX_NOTIFICATIONS {
                if let Some(old) = list.pop_back() {
                    evicted.push(old.id);
                }
            }
            (Vec::from(list.clone()), evicted)
        };
        if !evicted.is_empty() {
            metrics::counter!(crate::observability::NOTIFICATIONS_EVICTED_TOTAL)
                .increment(evicted.len() as u64);
        }
        self.persist(snapshot).await;
        self.hub.send(ServiceEvent::NotificationAdded { id });
        for old in evicted {
            self.hub.send(ServiceEvent::NotificationRemoved { id: old });
        }
        id
    }

    /// Matching notifications, newest first.
    pub async fn list(&self, filter: &NotificationFilter) -> Vec<InAppNotification> {
        self.notifications
            .read()
            .await
            .iter()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: Ulid) -> Option<InAppNotification> {
        self.notifications
            .read()
            .await
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.notifications.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.notifications.read().await.is_empty()
    }

    pub async fn unread_count(&self) -> usize {
        self.notifications.read().await.iter().filter(|n| !n.read).count()
    }

    pub async fn mark_read(&self, id: Ulid) -> Result<(), InboxError> {
        let snapshot = {
            let mut list = self.notifications.write().await;
            let n = list
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or(InboxError::NotFound(id))?;
            if n.read {
                return Ok(());
            }
            n.read = true;
            Vec::from(list.clone())
        };
        self.persist(snapshot).await;
        Ok(())
    }

    /// Returns how many notifications changed.
    pub async fn mark_all_read(&self) -> usize {
        let (changed, snapshot) = {
            let mut list = self.notifications.write().await;
            let mut changed = 0;
            for n in list.iter_mut().filter(|n| !n.read) {
                n.read = true;
                changed += 1;
            }
            (changed, Vec::from(list.clone()))
        };
        if changed > 0 {
            self.persist(snapshot).await;
        }
        changed
    }

    /// Remove a notification. A snoozed notification is dropped along with its timer.
    pub async fn delete(&self, id: Ulid) -> Result<InAppNotification, InboxError> {
        if let Some((_, snoozed)) = self.snoozed.remove(&id) {
            self.snooze_timers.cancel(id);
            return Ok(snoozed);
        }
        let (removed, snapshot) = {
            let mut list = self.notifications.write().await;
            let pos = list
                .iter()
                .position(|n| n.id == id)
                .ok_or(InboxError::NotFound(id))?;
            let removed = list.remove(pos).ok_or(InboxError::NotFound(id))?;
            (removed, Vec::from(list.clone()))
        };
        self.persist(snapshot).await;
        self.hub.send(ServiceEvent::NotificationRemoved { id });
        Ok(removed)
    }

    /// Drop every notification, snoozed ones included.
    pub async fn clear(&self) {
        self.snooze_timers.cancel_all();
        self.snoozed.clear();
        let removed: Vec<Ulid> = {
            let mut list = self.notifications.write().await;
            list.drain(..).map(|n| n.id).collect()
        };
        self.persist(Vec::new()).await;
        for id in removed {
            self.hub.send(ServiceEvent::NotificationRemoved { id });
        }
    }

    /// Take the notification out of the feed until `until`, then put it back
    /// at the front, unread. While snoozed it is absent from every query.
    /// Snoozing an already snoozed id moves its wake-up time.
    pub async fn snooze(&self, id: Ulid, until: NaiveDateTime) -> Result<(), InboxError> {
        if !self.snoozed.contains_key(&id) {
            let snapshot = {
                let mut list = self.notifications.write().await;
                let pos = list
                    .iter()
                    .position(|n| n.id == id)
                    .ok_or(InboxError::NotFound(id))?;
                let Some(n) = list.remove(pos) else {
                    return Err(InboxError::NotFound(id));
                };
                self.snoozed.insert(id, n);
                Vec::from(list.clone())
            };
            self.persist(snapshot).await;
            self.hub.send(ServiceEvent::NotificationRemoved { id });
        }

        let delay = (until - self.clock.now()).to_std().unwrap_or_default();
        let me = self.me.clone();
        self.snooze_timers.arm(id, delay, move |generation| async move {
            let Some(store) = me.upgrade() else { return };
            if store.snooze_timers.claim(id, generation) {
                store.wake(id).await;
            }
        });
        tracing::debug!(notification = %id, %until, "notification snoozed");
        Ok(())
    }

    pub fn is_snoozed(&self, id: Ulid) -> bool {
        self.snoozed.contains_key(&id)
    }

    async fn wake(&self, id: Ulid) {
        let Some((_, mut notification)) = self.snoozed.remove(&id) else {
            return;
        };
        notification.read = false;
        self.add(notification).await;
    }

    async fn persist(&self, snapshot: Vec<InAppNotification>) {
        metrics::gauge!(crate::observability::NOTIFICATIONS_STORED).set(snapshot.len() as f64);
        self.persister.save(Record::Notifications(snapshot)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::Topic;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn store() -> (Arc<NotificationStore>, Arc<ManualClock>, Arc<NotifyHub>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let hub = Arc::new(NotifyHub::new());
        let store = NotificationStore::new(Vec::new(), clock.clone(), Persister::disabled(), hub.clone());
        (store, clock, hub)
    }

    fn note(title: &str) -> InAppNotification {
        InAppNotification::new(NotificationKind::System, title, "", t0())
    }

    #[tokio::test]
    async fn newest_first_and_capped() {
        let (store, _, _) = store();
        let mut first = None;
        for i in 0..=MAX_NOTIFICATIONS {
            let id = store.add(note(&format!("n{i}"))).await;
            first.get_or_insert(id);
        }
        assert_eq!(store.len().await, MAX_NOTIFICATIONS);
        let all = store.list(&NotificationFilter::default()).await;
        assert_eq!(all[0].title, format!("n{MAX_NOTIFICATIONS}"));
        assert_eq!(all.last().unwrap().title, "n1");
        assert!(store.get(first.unwrap()).await.is_none(), "oldest evicted");
    }

    #[tokio::test]
    async fn filters_combine() {
        let (store, _, _) = store();
        let mut conflict = InAppNotification::new(NotificationKind::Conflict, "c", "", t0());
        conflict.priority = NotificationPriority::Urgent;
        conflict.category = NotificationCategory::Family;
        conflict.related_event_id = Some("e1".into());
        conflict.related_person_id = Some("bob".into());
        store.add(conflict).await;
        let mut later = note("later");
        later.timestamp = t0() + Duration::hours(2);
        store.add(later).await;

        let by_event = NotificationFilter {
            event_id: Some("e1".into()),
            ..Default::default()
        };
        assert_eq!(store.list(&by_event).await.len(), 1);

        let family_urgent = NotificationFilter {
            category: Some(NotificationCategory::Family),
            priority: Some(NotificationPriority::Urgent),
            person_id: Some("bob".into()),
            ..Default::default()
        };
        assert_eq!(store.list(&family_urgent).await[0].title, "c");

        let window = NotificationFilter {
            from: Some(t0() + Duration::hours(1)),
            until: Some(t0() + Duration::hours(3)),
            ..Default::default()
        };
        let hits = store.list(&window).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "later");

        let systems = NotificationFilter {
            kind: Some(NotificationKind::System),
            ..Default::default()
        };
        assert_eq!(store.list(&systems).await.len(), 1);
    }

    #[tokio::test]
    async fn read_state() {
        let (store, _, _) = store();
        let a = store.add(note("a")).await;
        store.add(note("b")).await;
        store.add(note("c")).await;
        assert_eq!(store.unread_count().await, 3);

        store.mark_read(a).await.unwrap();
        assert_eq!(store.unread_count().await, 2);
        assert_eq!(store.list(&NotificationFilter::unread()).await.len(), 2);

        assert_eq!(store.mark_all_read().await, 2);
        assert_eq!(store.unread_count().await, 0);
        let missing = Ulid::new();
        assert_eq!(store.mark_read(missing).await, Err(InboxError::NotFound(missing)));
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let (store, _, hub) = store();
        let mut rx = hub.subscribe(Topic::Notifications);
        let a = store.add(note("a")).await;
        store.add(note("b")).await;

        assert_eq!(store.delete(a).await.unwrap().title, "a");
        assert!(matches!(store.delete(a).await, Err(InboxError::NotFound(_))));

        assert_eq!(rx.recv().await.unwrap(), ServiceEvent::NotificationAdded { id: a });
        rx.recv().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ServiceEvent::NotificationRemoved { id: a });

        store.clear().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn snooze_hides_then_reinserts_at_front() {
        let (store, _, _) = store();
        let a = store.add(note("a")).await;
        store.mark_read(a).await.unwrap();
        store.add(note("b")).await;

        store.snooze(a, t0() + Duration::minutes(10)).await.unwrap();
        assert!(store.get(a).await.is_none());
        assert!(store.is_snoozed(a));
        assert_eq!(store.len().await, 1);

        tokio::time::sleep(std::time::Duration::from_secs(11 * 60)).await;
        let all = store.list(&NotificationFilter::default()).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a);
        assert!(!all[0].read);
        assert!(!store.is_snoozed(a));
    }

    #[tokio::test(start_paused = true)]
    async fn resnooze_replaces_timer() {
        let (store, _, _) = store();
        let a = store.add(note("a")).await;
        store.snooze(a, t0() + Duration::minutes(5)).await.unwrap();
        store.snooze(a, t0() + Duration::minutes(30)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(10 * 60)).await;
        assert!(store.get(a).await.is_none(), "first timer was replaced");
        tokio::time::sleep(std::time::Duration::from_secs(25 * 60)).await;
        assert!(store.get(a).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_snoozed_cancels_it() {
        let (store, _, _) = store();
        let a = store.add(note("a")).await;
        store.snooze(a, t0() + Duration::minutes(5)).await.unwrap();
        store.delete(a).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(10 * 60)).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn snooze_unknown_is_not_found() {
        let (store, _, _) = store();
        let id = Ulid::new();
        assert_eq!(
            store.snooze(id, t0()).await,
            Err(InboxError::NotFound(id))
        );
    }
}
