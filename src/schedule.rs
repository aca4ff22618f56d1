use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Label shown for a slot no conflict-free subject could fill.
pub const FREE_STUDY_LABEL: &str = "Free/Study";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    pub section: String,
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub id: String,
    pub class_id: String,
    pub name: String,
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDef {
    pub id: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCell {
    pub subject_id: Option<String>,
    pub subject_name: String,
    pub teacher_id: Option<String>,
}

impl ScheduleCell {
    fn placeholder() -> Self {
        ScheduleCell {
            subject_id: None,
            subject_name: FREE_STUDY_LABEL.to_string(),
            teacher_id: None,
        }
    }
}

/// day -> slot id -> cell. Day/slot ordering lives in the accompanying
/// `days`/`slots` lists, not in the map keys.
pub type ClassSchedule = BTreeMap<String, BTreeMap<String, ScheduleCell>>;

/// Run-scoped record of which teachers are already placed in which
/// (day, slot) pairs, shared across every class in one generation pass.
#[derive(Debug, Default)]
pub struct TeacherBusy {
    taken: HashSet<(String, String, String)>,
}

impl TeacherBusy {
    pub fn new() -> Self {
        TeacherBusy::default()
    }

    pub fn is_busy(&self, day: &str, slot_id: &str, teacher_id: &str) -> bool {
        self.taken.contains(&(
            day.to_string(),
            slot_id.to_string(),
            teacher_id.to_string(),
        ))
    }

    fn mark(&mut self, day: &str, slot_id: &str, teacher_id: &str) {
        self.taken.insert((
            day.to_string(),
            slot_id.to_string(),
            teacher_id.to_string(),
        ));
    }
}

pub fn default_days() -> Vec<String> {
    ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

pub fn default_slots() -> Vec<SlotDef> {
    [
        ("1", "08:00", "08:40"),
        ("2", "08:45", "09:25"),
        ("3", "09:30", "10:10"),
        ("4", "10:20", "11:00"),
        ("5", "11:05", "11:45"),
        ("6", "11:50", "12:30"),
    ]
    .iter()
    .map(|(id, start, end)| SlotDef {
        id: id.to_string(),
        start: start.to_string(),
        end: end.to_string(),
    })
    .collect()
}

/// A subject with no teacher of its own falls back to the class teacher;
/// with neither it is teacher-less and can never conflict.
fn resolve_teacher<'a>(cls: &'a ClassRecord, subject: &'a SubjectRecord) -> Option<&'a str> {
    subject
        .teacher_id
        .as_deref()
        .or(cls.teacher_id.as_deref())
}

/// Fill the full day x slot grid for one class with a round-robin pass over
/// its subjects, skipping subjects whose resolved teacher is already taken
/// for that (day, slot) in `busy`. Returns `None` for a class with no
/// subjects.
///
/// The rotation cursor starts at the first subject and is not reset between
/// days. After a successful placement it moves one past the chosen subject;
/// a placeholder leaves it where it was.
pub fn generate_for_class(
    cls: &ClassRecord,
    subjects: &[SubjectRecord],
    days: &[String],
    slots: &[SlotDef],
    busy: &mut TeacherBusy,
) -> Option<ClassSchedule> {
    if subjects.is_empty() {
        return None;
    }

    let mut schedule = ClassSchedule::new();
    let mut cursor: usize = 0;

    for day in days {
        let day_grid = schedule.entry(day.clone()).or_default();
        for slot in slots {
            // Bounded probe: at most one attempt per subject.
            let mut placed = false;
            for attempt in 0..subjects.len() {
                let idx = (cursor + attempt) % subjects.len();
                let subject = &subjects[idx];
                let teacher = resolve_teacher(cls, subject);
                if let Some(t) = teacher {
                    if busy.is_busy(day, &slot.id, t) {
                        continue;
                    }
                    busy.mark(day, &slot.id, t);
                }
                day_grid.insert(
                    slot.id.clone(),
                    ScheduleCell {
                        subject_id: Some(subject.id.clone()),
                        subject_name: subject.name.clone(),
                        teacher_id: teacher.map(|t| t.to_string()),
                    },
                );
                cursor = (idx + 1) % subjects.len();
                placed = true;
                break;
            }
            if !placed {
                day_grid.insert(slot.id.clone(), ScheduleCell::placeholder());
            }
        }
    }

    Some(schedule)
}

/// One generation run over every class, in `classes` order. The busy set is
/// owned by the run, so earlier classes win contested teachers and a rerun
/// with identical inputs reproduces the same grids.
pub fn generate_all(
    classes: &[ClassRecord],
    subjects_by_class: &HashMap<String, Vec<SubjectRecord>>,
    days: &[String],
    slots: &[SlotDef],
) -> BTreeMap<String, ClassSchedule> {
    let mut busy = TeacherBusy::new();
    let mut out = BTreeMap::new();
    for cls in classes {
        let subjects = subjects_by_class
            .get(&cls.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        if let Some(schedule) = generate_for_class(cls, subjects, days, slots, &mut busy) {
            out.insert(cls.id.clone(), schedule);
        }
    }
    out
}
