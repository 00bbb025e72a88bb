//! Focus-mode interception. Pure decision logic; the pipeline feeds it the
//! recipient's settings and delivers whatever reply text comes back.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use uuid::Uuid;

use pulse_types::models::{FocusSchedule, Participant};

/// Decide whether a message from `sender` should draw `recipient`'s
/// auto-reply at `now`. Returns the configured reply text when focus mode
/// applies: the active flag is set, the sender is not allow-listed, and any
/// schedule window covers `now`.
pub fn should_auto_reply(
    recipient: &Participant,
    sender: Uuid,
    now: DateTime<Utc>,
) -> Option<String> {
    let focus = &recipient.focus;
    if !focus.is_active || focus.auto_reply.is_empty() {
        return None;
    }
    if focus.allowed_contacts.contains(&sender) {
        return None;
    }
    if let Some(schedule) = &focus.schedule {
        // A malformed schedule cannot gate anything; focus stays in effect.
        if !within_schedule(schedule, now).unwrap_or(true) {
            return None;
        }
    }
    Some(focus.auto_reply.clone())
}

/// Whether `now` falls inside the schedule window. The window may wrap past
/// midnight; the day check is always against the current weekday. `None`
/// when the times fail to parse.
fn within_schedule(schedule: &FocusSchedule, now: DateTime<Utc>) -> Option<bool> {
    let start = parse_hhmm(&schedule.start)?;
    let end = parse_hhmm(&schedule.end)?;

    let today = day_name(now.weekday());
    if !schedule.days.iter().any(|d| d == today) {
        return Some(false);
    }

    let minute_of_day = now.hour() * 60 + now.minute();
    Some(if start <= end {
        start <= minute_of_day && minute_of_day <= end
    } else {
        minute_of_day >= start || minute_of_day <= end
    })
}

fn parse_hhmm(raw: &str) -> Option<u32> {
    let (hours, minutes) = raw.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_types::models::FocusMode;

    fn participant_with(focus: FocusMode) -> Participant {
        Participant {
            id: Uuid::new_v4(),
            name: "Recipient".to_string(),
            email: "recipient@example.test".to_string(),
            avatar: None,
            bio: None,
            is_online: true,
            last_seen: Utc::now(),
            privacy: Default::default(),
            focus,
            created_at: Utc::now(),
        }
    }

    // 2026-08-17 is a Monday
    fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 17, hour, minute, 0).unwrap()
    }

    #[test]
    fn inactive_focus_never_replies() {
        let recipient = participant_with(FocusMode::default());
        assert!(should_auto_reply(&recipient, Uuid::new_v4(), Utc::now()).is_none());
    }

    #[test]
    fn active_focus_replies_with_configured_text() {
        let recipient = participant_with(FocusMode {
            is_active: true,
            auto_reply: "In deep work until noon.".to_string(),
            ..Default::default()
        });
        let reply = should_auto_reply(&recipient, Uuid::new_v4(), Utc::now());
        assert_eq!(reply.as_deref(), Some("In deep work until noon."));
    }

    #[test]
    fn allow_listed_sender_bypasses_focus() {
        let sender = Uuid::new_v4();
        let recipient = participant_with(FocusMode {
            is_active: true,
            allowed_contacts: vec![sender],
            ..Default::default()
        });
        assert!(should_auto_reply(&recipient, sender, Utc::now()).is_none());
        assert!(should_auto_reply(&recipient, Uuid::new_v4(), Utc::now()).is_some());
    }

    #[test]
    fn schedule_gates_the_reply_to_its_window() {
        let recipient = participant_with(FocusMode {
            is_active: true,
            schedule: Some(FocusSchedule {
                start: "09:00".to_string(),
                end: "17:00".to_string(),
                days: vec!["mon".to_string()],
            }),
            ..Default::default()
        });

        assert!(should_auto_reply(&recipient, Uuid::new_v4(), monday_at(10, 30)).is_some());
        assert!(should_auto_reply(&recipient, Uuid::new_v4(), monday_at(18, 0)).is_none());
        // Tuesday is outside the configured days
        let tuesday = Utc.with_ymd_and_hms(2026, 8, 18, 10, 30, 0).unwrap();
        assert!(should_auto_reply(&recipient, Uuid::new_v4(), tuesday).is_none());
    }

    #[test]
    fn schedule_window_may_wrap_past_midnight() {
        let recipient = participant_with(FocusMode {
            is_active: true,
            schedule: Some(FocusSchedule {
                start: "22:00".to_string(),
                end: "06:00".to_string(),
                days: vec!["mon".to_string()],
            }),
            ..Default::default()
        });

        assert!(should_auto_reply(&recipient, Uuid::new_v4(), monday_at(23, 0)).is_some());
        assert!(should_auto_reply(&recipient, Uuid::new_v4(), monday_at(5, 0)).is_some());
        assert!(should_auto_reply(&recipient, Uuid::new_v4(), monday_at(12, 0)).is_none());
    }

    #[test]
    fn malformed_schedule_does_not_disable_focus() {
        let recipient = participant_with(FocusMode {
            is_active: true,
            schedule: Some(FocusSchedule {
                start: "25:99".to_string(),
                end: "oops".to_string(),
                days: vec!["mon".to_string()],
            }),
            ..Default::default()
        });
        assert!(should_auto_reply(&recipient, Uuid::new_v4(), monday_at(12, 0)).is_some());
    }
}
