//! Presentation order of a topic's projects.
//!
//! This is the only place the order is computed. Clients receive it through
//! the project listing and must not re-sort.

use chrono::{DateTime, Utc};
use shared::domain::{Project, ProjectId};

/// Sort key: group number ascending with missing groups last, then
/// submission time. The sort is stable, so exact ties keep store order.
fn presentation_key(project: &Project) -> (bool, Option<i64>, DateTime<Utc>) {
    (
        project.group_number.is_none(),
        project.group_number,
        project.submitted_at,
    )
}

pub fn order_projects(projects: &mut [Project]) {
    projects.sort_by_key(presentation_key);
}

pub fn ordered_project_ids(projects: &[Project]) -> Vec<ProjectId> {
    let mut ordered: Vec<&Project> = projects.iter().collect();
    ordered.sort_by_key(|project| presentation_key(project));
    ordered.into_iter().map(|project| project.project_id).collect()
}

/// Project presented after `current`, if any.
pub fn following_project(ordered: &[ProjectId], current: ProjectId) -> Option<ProjectId> {
    let position = ordered.iter().position(|id| *id == current)?;
    ordered.get(position + 1).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use shared::domain::{TopicId, UserId};

    fn project(id: i64, group_number: Option<i64>, offset_secs: i64) -> Project {
        let base = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        Project {
            project_id: ProjectId(id),
            topic_id: TopicId(1),
            title: format!("project {id}"),
            submitted_by: UserId(100 + id),
            group_number,
            submitted_at: base + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn missing_group_numbers_sort_last() {
        let projects = vec![
            project(1, Some(3), 0),
            project(2, None, 0),
            project(3, Some(1), 0),
        ];
        assert_eq!(
            ordered_project_ids(&projects),
            vec![ProjectId(3), ProjectId(1), ProjectId(2)]
        );
    }

    #[test]
    fn largest_group_number_still_precedes_missing_group() {
        let projects = vec![
            project(1, None, 0),
            project(2, Some(i64::MAX), 50),
            project(3, Some(4), 90),
        ];
        assert_eq!(
            ordered_project_ids(&projects),
            vec![ProjectId(3), ProjectId(2), ProjectId(1)]
        );
    }

    #[test]
    fn submission_time_breaks_group_ties() {
        let mut projects = vec![
            project(1, Some(2), 30),
            project(2, Some(2), 10),
            project(3, None, 20),
            project(4, None, 5),
        ];
        order_projects(&mut projects);
        let ids: Vec<i64> = projects.iter().map(|p| p.project_id.0).collect();
        assert_eq!(ids, vec![2, 1, 4, 3]);
    }

    #[test]
    fn following_project_stops_at_end_of_list() {
        let ordered = vec![ProjectId(5), ProjectId(9)];
        assert_eq!(following_project(&ordered, ProjectId(5)), Some(ProjectId(9)));
        assert_eq!(following_project(&ordered, ProjectId(9)), None);
        assert_eq!(following_project(&ordered, ProjectId(1)), None);
    }
}
