//! Scene compilation: turn a newest-first record sequence into at most
//! `N_images` scenes that each cover the bbox well enough.
//!
//! Two shapes are supported. Providers with large, self-sufficient tiles use
//! [`compile_single_record`]; providers whose tiles must be stitched use
//! [`compile_grouped`], which groups same-day records per sensor instance and
//! product type and keeps one canonical product type per sensor.
use std::iter::Peekable;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::core::model::{CatalogRecord, Scene};
use crate::core::specs::ImageSpecs;
use crate::geometry::{BoundingBox, overlap};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompileParams {
    pub n_images: usize,
    pub min_intersect: f64,
    pub skip_days: u32,
}

impl From<&ImageSpecs> for CompileParams {
    fn from(specs: &ImageSpecs) -> Self {
        Self {
            n_images: specs.n_images,
            min_intersect: specs.min_intersect,
            skip_days: specs.skip_days,
        }
    }
}

/// Same-day records from one sensor instance and product type.
#[derive(Debug, Clone)]
pub struct CandidateGroup {
    pub sensor_instance: String,
    pub product_type: String,
    pub records: Vec<CatalogRecord>,
}

impl CandidateGroup {
    fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Fraction of `bbox` covered by the union of the records' footprints.
pub fn overlap_fraction<'a, I>(bbox: &BoundingBox, records: I) -> f64
where
    I: IntoIterator<Item = &'a CatalogRecord>,
{
    overlap(bbox, records.into_iter().map(|r| &r.footprint)).1
}

fn well_overlapped(bbox: &BoundingBox, records: &[CatalogRecord], min_intersect: f64) -> bool {
    let frac = overlap_fraction(bbox, records);
    if frac > 0.0 && frac >= min_intersect {
        return true;
    }
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    info!(
        "Rejecting scene {:?}. Overlap with bbox {:.1}%",
        ids,
        frac * 100.0
    );
    false
}

fn newest_first(mut records: Vec<CatalogRecord>) -> Vec<CatalogRecord> {
    records.sort_by(|a, b| b.acquired.cmp(&a.acquired));
    records
}

/// Skip records acquired fewer than `skip_days` days before `date`.
fn fast_forward<I>(records: &mut Peekable<I>, date: NaiveDate, skip_days: u32)
where
    I: Iterator<Item = CatalogRecord>,
{
    while let Some(next) = records.peek() {
        if (date - next.date()).num_days() < i64::from(skip_days) {
            debug!("Skipping {} (within {} days of {})", next.id, skip_days, date);
            records.next();
        } else {
            break;
        }
    }
}

/// Accept single records whose own footprint covers the bbox, newest first
/// and `skip_days` apart. Covering records left over are kept as alternates of
/// the newest scene not older than them, provided they stay `skip_days` clear
/// of the next scene.
pub fn compile_single_record(
    records: Vec<CatalogRecord>,
    bbox: &BoundingBox,
    params: CompileParams,
) -> Vec<Scene> {
    let skip = i64::from(params.skip_days);
    let mut scenes: Vec<Scene> = Vec::new();
    let mut spare = Vec::new();
    let mut last: Option<NaiveDate> = None;
    for record in newest_first(records) {
        if !well_overlapped(bbox, std::slice::from_ref(&record), params.min_intersect) {
            continue;
        }
        let date = record.date();
        let spaced = last.is_none_or(|prev| (prev - date).num_days() >= skip);
        if spaced && scenes.len() < params.n_images {
            last = Some(date);
            scenes.push(Scene::new(vec![record]));
        } else {
            spare.push(record);
        }
    }

    for record in spare {
        let date = record.date();
        let Some(k) = scenes
            .iter()
            .rposition(|s| s.date().is_some_and(|d| d >= date))
        else {
            continue;
        };
        let clear_of_next = scenes
            .get(k + 1)
            .and_then(Scene::date)
            .is_none_or(|next| (date - next).num_days() >= skip);
        if clear_of_next {
            debug!("Holding {} as an alternate for {:?}", record.id, scenes[k].ids());
            scenes[k].alternates.push(record);
        }
    }
    scenes
}

/// Group one day's records by (sensor instance, product type), in order of
/// first appearance.
pub fn group_day(records: Vec<CatalogRecord>) -> Vec<CandidateGroup> {
    let mut groups: Vec<CandidateGroup> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|g| {
            g.sensor_instance == record.sensor_instance && g.product_type == record.product_type
        }) {
            Some(group) => group.records.push(record),
            None => groups.push(CandidateGroup {
                sensor_instance: record.sensor_instance.clone(),
                product_type: record.product_type.clone(),
                records: vec![record],
            }),
        }
    }
    groups
}

/// Keep one group per sensor instance: the one whose product type ranks
/// first in `precedence`. Unlisted product types rank last, ties broken by
/// name. Output follows first appearance of each sensor instance.
pub fn deduplicate(groups: Vec<CandidateGroup>, precedence: &[&str]) -> Vec<CandidateGroup> {
    let rank = |g: &CandidateGroup| {
        let pos = precedence
            .iter()
            .position(|p| *p == g.product_type)
            .unwrap_or(precedence.len());
        (pos, g.product_type.clone())
    };

    let mut kept: Vec<CandidateGroup> = Vec::new();
    for group in groups {
        match kept
            .iter_mut()
            .find(|k| k.sensor_instance == group.sensor_instance)
        {
            Some(existing) => {
                if rank(&group) < rank(existing) {
                    debug!(
                        "Preferring {} over {} for sensor {}",
                        group.product_type, existing.product_type, group.sensor_instance
                    );
                    *existing = group;
                }
            }
            None => kept.push(group),
        }
    }
    kept
}

/// Accept same-day, same-sensor groups whose combined footprint covers the bbox.
pub fn compile_grouped(
    records: Vec<CatalogRecord>,
    bbox: &BoundingBox,
    params: CompileParams,
    precedence: &[&str],
) -> Vec<Scene> {
    let mut scenes = Vec::new();
    let mut iter = newest_first(records).into_iter().peekable();
    while scenes.len() < params.n_images {
        let Some(first) = iter.next() else { break };
        let date = first.date();
        let mut day = vec![first];
        while let Some(next) = iter.next_if(|r| r.date() == date) {
            day.push(next);
        }

        let candidates: Vec<CandidateGroup> = group_day(day)
            .into_iter()
            .filter(|g| well_overlapped(bbox, &g.records, params.min_intersect))
            .collect();
        let accepted = deduplicate(candidates, precedence);
        if accepted.is_empty() {
            continue;
        }

        if params.skip_days > 0 {
            if let Some(group) = accepted.into_iter().next() {
                debug!("Accepting {:?} from {}", group.ids(), date);
                scenes.push(Scene::new(group.records));
            }
            fast_forward(&mut iter, date, params.skip_days);
        } else {
            for group in accepted {
                if scenes.len() >= params.n_images {
                    break;
                }
                debug!("Accepting {:?} from {}", group.ids(), date);
                scenes.push(Scene::new(group.records));
            }
        }
    }
    scenes
}
