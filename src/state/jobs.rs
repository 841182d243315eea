//! Job, cohort and selection lifecycle on top of the store's commit/publish primitives.
//!
//! Each operation mutates the typed tree under the state lock, releases it, and only then
//! commits the path change (`jobs.<id>`, `cohorts.<id>`, ...) and publishes its domain events.

use std::sync::{Arc, PoisonError};

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::StateError;
use crate::state::event::{channels, StoreEvent};
use crate::state::model::{CohortRecord, FileRef, JobPatch, JobRecord, JobStatus};
use crate::state::store::{to_json, StateStore};

impl StateStore {
    /// Adds (or replaces) the job `id`, seeding `created_at`/`updated_at`.
    ///
    /// Publishes `job:added` and `jobs:changed`.
    pub fn add_job(&self, id: &str, data: JobPatch) -> JobRecord {
        let job = JobRecord::seeded(data, Utc::now());
        let (old, ids) = {
            let mut state = self.state();
            let old = state.jobs.insert(id.to_string(), job.clone());
            (old, state.jobs.keys().cloned().collect())
        };
        debug!(job = id, status = job.status.as_str(), "job added");

        self.commit(format!("jobs.{id}"), to_json(&job), old.as_ref().map(to_json));
        self.publish(
            channels::JOB_ADDED,
            StoreEvent::JobAdded {
                id: id.to_string(),
                job: job.clone(),
            },
        );
        self.publish(channels::JOBS_CHANGED, StoreEvent::JobsChanged { ids });
        job
    }

    /// Merges `patch` into job `id` and bumps `updated_at`.
    ///
    /// Unknown ids are logged and ignored (`None`).
    pub fn update_job(&self, id: &str, patch: JobPatch) -> Option<JobRecord> {
        let updated = {
            let mut state = self.state();
            match state.jobs.get_mut(id) {
                Some(job) => {
                    let previous = job.clone();
                    job.apply(patch, Utc::now());
                    Some((previous, job.clone(), state.jobs.keys().cloned().collect()))
                }
                None => None,
            }
        };
        let Some((previous, job, ids)) = updated else {
            warn!(job = id, "update for unknown job ignored");
            return None;
        };

        self.commit(format!("jobs.{id}"), to_json(&job), Some(to_json(&previous)));
        self.publish(
            channels::JOB_UPDATED,
            StoreEvent::JobUpdated {
                id: id.to_string(),
                job: job.clone(),
                previous,
            },
        );
        self.publish(channels::JOBS_CHANGED, StoreEvent::JobsChanged { ids });
        Some(job)
    }

    /// Shorthand for `update_job(id, JobPatch::status(status))`.
    pub fn update_job_status(&self, id: &str, status: JobStatus) -> Option<JobRecord> {
        self.update_job(id, JobPatch::status(status))
    }

    /// Removes job `id` and forgets its poll-stop hook without invoking it.
    ///
    /// Unknown ids are a no-op (`None`).
    pub fn remove_job(&self, id: &str) -> Option<JobRecord> {
        let (job, ids) = {
            let mut state = self.state();
            let job = state.jobs.shift_remove(id)?;
            (job, state.jobs.keys().cloned().collect::<Vec<_>>())
        };
        self.stops().jobs.shift_remove(id);
        debug!(job = id, "job removed");

        self.commit(format!("jobs.{id}"), serde_json::Value::Null, Some(to_json(&job)));
        self.publish(
            channels::JOB_REMOVED,
            StoreEvent::JobRemoved {
                id: id.to_string(),
                job: job.clone(),
            },
        );
        self.publish(channels::JOBS_CHANGED, StoreEvent::JobsChanged { ids });
        Some(job)
    }

    pub fn get_job(&self, id: &str) -> Option<JobRecord> {
        self.state().jobs.get(id).cloned()
    }

    /// All jobs in insertion order.
    pub fn get_jobs(&self) -> IndexMap<String, JobRecord> {
        self.state().jobs.clone()
    }

    /// Attaches the hook that stops polling for job `id`; replaces any previous hook.
    pub fn set_job_poll_stop(
        &self,
        id: &str,
        stop: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), StateError> {
        if !self.state().jobs.contains_key(id) {
            return Err(StateError::JobNotFound { id: id.to_string() });
        }
        self.stops().jobs.insert(id.to_string(), Arc::new(stop));
        Ok(())
    }

    /// Adds (or replaces) cohort `id` with no member jobs.
    ///
    /// Publishes `cohort:added` and `cohorts:changed`.
    pub fn add_cohort(&self, id: &str, alias: &str) -> CohortRecord {
        let now = Utc::now();
        let cohort = CohortRecord {
            alias: alias.to_string(),
            job_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let (old, ids) = {
            let mut state = self.state();
            let old = state.cohorts.insert(id.to_string(), cohort.clone());
            (old, state.cohorts.keys().cloned().collect())
        };

        self.commit(
            format!("cohorts.{id}"),
            to_json(&cohort),
            old.as_ref().map(to_json),
        );
        self.publish(
            channels::COHORT_ADDED,
            StoreEvent::CohortAdded {
                id: id.to_string(),
                cohort: cohort.clone(),
            },
        );
        self.publish(channels::COHORTS_CHANGED, StoreEvent::CohortsChanged { ids });
        cohort
    }

    /// Appends `job_id` to cohort `cohort_id` and back-fills the job's `cohort_id`.
    ///
    /// A job belongs to at most one cohort: if another cohort lists it, the job is moved
    /// out of that cohort first and `cohort:updated` is published for it as well.
    ///
    /// Returns `Ok(false)` when the job is already a member.
    pub fn add_job_to_cohort(&self, cohort_id: &str, job_id: &str) -> Result<bool, StateError> {
        let (previous, cohort, departed, job_change, ids) = {
            let mut state = self.state();
            match state.cohorts.get(cohort_id) {
                None => {
                    return Err(StateError::CohortNotFound {
                        id: cohort_id.to_string(),
                    })
                }
                Some(c) if c.job_ids.iter().any(|j| j == job_id) => return Ok(false),
                Some(_) => {}
            }
            let now = Utc::now();

            let mut departed = Vec::new();
            for (other_id, other) in state.cohorts.iter_mut() {
                if other_id == cohort_id || !other.job_ids.iter().any(|j| j == job_id) {
                    continue;
                }
                let before = other.clone();
                other.job_ids.retain(|j| j != job_id);
                other.updated_at = now;
                departed.push((other_id.clone(), before, other.clone()));
            }

            let Some(cohort) = state.cohorts.get_mut(cohort_id) else {
                return Err(StateError::CohortNotFound {
                    id: cohort_id.to_string(),
                });
            };
            let previous = cohort.clone();
            cohort.job_ids.push(job_id.to_string());
            cohort.updated_at = now;
            let cohort = cohort.clone();

            let job_change = state.jobs.get_mut(job_id).map(|job| {
                let old = to_json(&job.cohort_id);
                job.cohort_id = Some(cohort_id.to_string());
                old
            });
            let ids: Vec<String> = state.cohorts.keys().cloned().collect();
            (previous, cohort, departed, job_change, ids)
        };

        for (other_id, before, after) in &departed {
            self.commit(
                format!("cohorts.{other_id}"),
                to_json(after),
                Some(to_json(before)),
            );
        }
        self.commit(
            format!("cohorts.{cohort_id}"),
            to_json(&cohort),
            Some(to_json(&previous)),
        );
        if let Some(old) = job_change {
            self.commit(
                format!("jobs.{job_id}.cohort_id"),
                serde_json::Value::from(cohort_id),
                Some(old),
            );
        }
        for (other_id, _, after) in departed {
            self.publish(
                channels::COHORT_UPDATED,
                StoreEvent::CohortUpdated {
                    id: other_id,
                    cohort: after,
                },
            );
        }
        self.publish(
            channels::COHORT_UPDATED,
            StoreEvent::CohortUpdated {
                id: cohort_id.to_string(),
                cohort,
            },
        );
        self.publish(channels::COHORTS_CHANGED, StoreEvent::CohortsChanged { ids });
        Ok(true)
    }

    /// Removes cohort `id`, hides it, and forgets its poll-stop hook.
    ///
    /// Member jobs are kept. Unknown ids are a no-op (`None`).
    pub fn remove_cohort(&self, id: &str) -> Option<CohortRecord> {
        let (cohort, ids, was_displayed) = {
            let mut state = self.state();
            let cohort = state.cohorts.shift_remove(id)?;
            let was_displayed = state.displayed_cohorts.shift_remove(id);
            (cohort, state.cohorts.keys().cloned().collect::<Vec<_>>(), was_displayed)
        };
        self.stops().cohorts.shift_remove(id);

        self.commit(
            format!("cohorts.{id}"),
            serde_json::Value::Null,
            Some(to_json(&cohort)),
        );
        if was_displayed {
            self.commit_displayed(true);
        }
        self.publish(
            channels::COHORT_REMOVED,
            StoreEvent::CohortRemoved {
                id: id.to_string(),
                cohort: cohort.clone(),
            },
        );
        self.publish(channels::COHORTS_CHANGED, StoreEvent::CohortsChanged { ids });
        Some(cohort)
    }

    pub fn get_cohort(&self, id: &str) -> Option<CohortRecord> {
        self.state().cohorts.get(id).cloned()
    }

    /// All cohorts in insertion order.
    pub fn get_cohorts(&self) -> IndexMap<String, CohortRecord> {
        self.state().cohorts.clone()
    }

    /// Member count of cohort `id` (`0` if unknown).
    pub fn get_cohort_job_count(&self, id: &str) -> usize {
        self.state().cohorts.get(id).map_or(0, |c| c.job_ids.len())
    }

    /// Cohort the job belongs to, if any.
    pub fn get_job_cohort(&self, job_id: &str) -> Option<String> {
        self.state().jobs.get(job_id).and_then(|j| j.cohort_id.clone())
    }

    /// `true` only when the cohort has members and every member job is `completed`.
    ///
    /// A member id with no job record counts as incomplete.
    pub fn are_cohort_jobs_complete(&self, id: &str) -> bool {
        let state = self.state();
        let Some(cohort) = state.cohorts.get(id) else {
            return false;
        };
        !cohort.job_ids.is_empty()
            && cohort.job_ids.iter().all(|j| {
                state
                    .jobs
                    .get(j)
                    .is_some_and(|job| job.status == JobStatus::Completed)
            })
    }

    /// Attaches the hook that stops polling for cohort `id`; replaces any previous hook.
    pub fn set_cohort_poll_stop(
        &self,
        id: &str,
        stop: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), StateError> {
        if !self.state().cohorts.contains_key(id) {
            return Err(StateError::CohortNotFound { id: id.to_string() });
        }
        self.stops().cohorts.insert(id.to_string(), Arc::new(stop));
        Ok(())
    }

    /// Replaces the selected files.
    pub fn set_selected_files(&self, files: Vec<FileRef>) -> bool {
        let old = {
            let mut state = self.state();
            if state.selected_files == files {
                return false;
            }
            std::mem::replace(&mut state.selected_files, files.clone())
        };
        self.commit("selected_files".into(), to_json(&files), Some(to_json(&old)));
        true
    }

    /// Appends a file unless one with the same name is already selected.
    pub fn add_selected_file(&self, file: FileRef) -> bool {
        let (old, new) = {
            let mut state = self.state();
            if state.selected_files.iter().any(|f| f.name == file.name) {
                return false;
            }
            let old = state.selected_files.clone();
            state.selected_files.push(file);
            (old, state.selected_files.clone())
        };
        self.commit("selected_files".into(), to_json(&new), Some(to_json(&old)));
        true
    }

    pub fn clear_selected_files(&self) -> bool {
        self.set_selected_files(Vec::new())
    }

    /// Marks cohort `id` as displayed. Returns `false` if it already was.
    pub fn show_cohort(&self, id: &str) -> bool {
        if !self.state().displayed_cohorts.insert(id.to_string()) {
            return false;
        }
        self.commit_displayed(false);
        true
    }

    /// Removes cohort `id` from the displayed set. Returns `false` if it was not shown.
    pub fn hide_cohort(&self, id: &str) -> bool {
        if !self.state().displayed_cohorts.shift_remove(id) {
            return false;
        }
        self.commit_displayed(true);
        true
    }

    pub fn is_cohort_displayed(&self, id: &str) -> bool {
        self.state().displayed_cohorts.contains(id)
    }

    /// Commits `displayed_cohorts`; the old value is not tracked for set membership.
    fn commit_displayed(&self, removed: bool) {
        let current = to_json(&self.state().displayed_cohorts);
        debug!(removed, "displayed cohorts changed");
        self.commit("displayed_cohorts".into(), current, None);
    }

    fn stops(&self) -> std::sync::MutexGuard<'_, crate::state::store::PollStops> {
        self.inner.stops.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
