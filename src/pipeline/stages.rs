//! One function per stage transition
//!
//! Each takes the current record and returns the value for the next stage's field.
//! None of them write to the document store.

use anyhow::{Context, Result, anyhow};
use std::fs;

use super::{Collaborators, PipelineParams};
use crate::api::retry::{Attempt, ensure_len, with_retry};
use crate::domain::{AreaStage, Artifact, FrontageStage, LotRecord};
use crate::error::LotError;
use crate::frontage::{
    centroid, fill_street_names, probe_ring, select_frontage, snap_to_road, street_names,
};
use crate::geometry::{
    MetricConversion, convert_point_list, geodesic_area, planar_area, select_adjustment, to_metric,
};
use crate::mesh::build_volumetric_mesh;
use crate::slope::{Declivity, SlopePoint, declivity};
use crate::tabular::{self, ROAD_COLOR, TabularRow};

pub const CSV_NAME: &str = "points.csv";

pub fn object_path(id: &str, name: &str) -> String {
    format!("lots/{}/{}", id, name)
}

fn require<'a, T>(field: &'a Option<T>, name: &'static str) -> Result<&'a T> {
    field
        .as_ref()
        .ok_or_else(|| anyhow!(LotError::MissingStageInput(name)))
}

fn boundary(record: &LotRecord) -> Result<&[(f64, f64)]> {
    record
        .boundary()
        .ok_or_else(|| anyhow!(LotError::MissingStageInput("boundary")))
}

/// Detected -> AreaComputed: regularise the outline and measure it
pub fn compute_area(record: &LotRecord, params: &PipelineParams) -> Result<AreaStage> {
    let raw = &record.detection.polygon;
    let adjustment = select_adjustment(raw, &params.adjustment)?;
    if adjustment.is_none() {
        tracing::info!(lot = %record.id, "No adjustment possible, keeping raw polygon");
    }

    let outline = adjustment
        .as_ref()
        .map(|a| a.points.clone())
        .unwrap_or_else(|| raw.clone());

    let frame = &record.frame;
    let pixel_area = planar_area(&outline) * frame.width as f64 * frame.height as f64;
    let boundary: Vec<(f64, f64)> = outline
        .iter()
        .map(|&(nx, ny)| frame.normalized_to_geo(nx, ny))
        .collect();
    let geodesic_area_m2 = geodesic_area(&boundary);

    Ok(AreaStage {
        adjustment,
        outline,
        pixel_area,
        geodesic_area_m2,
        boundary,
    })
}

/// Mean color of the 3x3 block around a normalized image position
fn sample(image: &image::RgbImage, nx: f64, ny: f64) -> [u8; 3] {
    let (w, h) = image.dimensions();
    let cx = (nx * (w - 1) as f64).round().clamp(0.0, (w - 1) as f64) as i64;
    let cy = (ny * (h - 1) as f64).round().clamp(0.0, (h - 1) as f64) as i64;

    let mut sum = [0u32; 3];
    let mut count = 0u32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let (x, y) = (cx + dx, cy + dy);
            if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
                continue;
            }
            let px = image.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                sum[c] += px[c] as u32;
            }
            count += 1;
        }
    }
    sum.map(|s| (s as f64 / count.max(1) as f64).round() as u8)
}

/// AreaComputed -> Colored: sample the lot image at each outline vertex
pub fn sample_colors(record: &LotRecord, collab: &Collaborators) -> Result<Vec<[u8; 3]>> {
    let area = require(&record.area, "area")?;
    let path = require(&record.image, "image")?;

    let bytes = collab.objects.get(path)?;
    let image = image::load_from_memory(&bytes)
        .with_context(|| format!("Failed to decode lot image {}", path))?
        .to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("Lot image {} is empty", path));
    }

    Ok(area
        .outline
        .iter()
        .map(|&(nx, ny)| sample(&image, nx, ny))
        .collect())
}

/// Colored -> Elevated
pub fn lookup_elevations(record: &LotRecord, collab: &Collaborators) -> Result<Vec<Option<f64>>> {
    let points = boundary(record)?;
    let elevations = collab.elevation.elevations(points)?;
    ensure_len(elevations.len(), points.len(), "elevation")?;
    Ok(elevations)
}

/// Elevated -> MetricConverted
pub fn convert_metric(record: &LotRecord) -> Result<MetricConversion> {
    let elevations = require(&record.elevation, "elevation")?;
    Ok(convert_point_list(boundary(record)?, elevations)?)
}

/// MetricConverted -> CardinalPointsAdded
pub fn place_probes(record: &LotRecord, params: &PipelineParams) -> Result<Vec<(f64, f64)>> {
    let points = boundary(record)?;
    let center = centroid(points).ok_or_else(|| anyhow!(LotError::TooFewPoints(0)))?;
    Ok(probe_ring(center, points, params.frontage.probe_points))
}

/// CardinalPointsAdded -> FrontageResolved
pub fn resolve_frontage(
    record: &LotRecord,
    collab: &Collaborators,
    params: &PipelineParams,
) -> Result<FrontageStage> {
    let probes = require(&record.probes, "probes")?;
    let mut snapped = snap_to_road(collab.snapper.as_ref(), probes);
    if let Some(geocoder) = &collab.geocoder {
        fill_street_names(geocoder.as_ref(), &mut snapped);
    }

    let locations: Vec<(f64, f64)> = snapped.iter().map(|s| s.location).collect();
    let front = select_frontage(boundary(record)?, &locations, params.frontage.front_points)?;
    tracing::debug!(lot = %record.id, ?front, snapped = snapped.len(), "Frontage resolved");

    Ok(FrontageStage {
        front,
        streets: street_names(&snapped),
        snapped,
    })
}

/// Lot rows followed by road rows, in the tabular file layout
pub fn build_rows(record: &LotRecord, collab: &Collaborators) -> Result<Vec<TabularRow>> {
    let metric = require(&record.metric, "metric")?;
    let colors = require(&record.colors, "colors")?;
    let frontage = require(&record.frontage, "frontage")?;
    if metric.rows.len() != colors.len() {
        return Err(anyhow!(LotError::LengthMismatch(format!(
            "{} metric rows, {} colors",
            metric.rows.len(),
            colors.len()
        ))));
    }

    let known: Vec<f64> = metric.valid_rows().filter_map(|p| p.elevation).collect();
    let lowest = known
        .iter()
        .copied()
        .reduce(f64::min)
        .ok_or_else(|| anyhow!(LotError::MissingStageInput("elevation")))?;
    let lowest_front = frontage
        .front
        .iter()
        .filter_map(|&i| metric.rows.get(i).copied().flatten())
        .filter_map(|p| p.elevation)
        .reduce(f64::min)
        .unwrap_or(lowest);

    let mut rows = Vec::with_capacity(metric.rows.len() + frontage.snapped.len());
    for (i, (row, &color)) in metric.rows.iter().zip(colors).enumerate() {
        let Some(point) = row else {
            tracing::warn!(lot = %record.id, index = i, "Dropping unconverted point");
            continue;
        };
        rows.push(TabularRow {
            x: point.easting,
            y: point.northing,
            z: point.elevation.unwrap_or(lowest),
            zone_number: point.zone_number,
            zone_letter: point.zone_letter,
            color,
            front: frontage.front.contains(&i),
            road: false,
        });
    }

    let road: Vec<(f64, f64)> = frontage.snapped.iter().map(|s| s.location).collect();
    let road_elevations = match collab.elevation.elevations(&road) {
        Ok(e) if e.len() == road.len() => e,
        Ok(_) | Err(_) => {
            tracing::warn!(lot = %record.id, "Road elevation lookup failed, using lowest front elevation");
            vec![None; road.len()]
        }
    };

    for (&(lat, lon), elevation) in road.iter().zip(road_elevations) {
        match to_metric(lat, lon) {
            Ok(utm) => rows.push(TabularRow {
                x: utm.easting,
                y: utm.northing,
                z: elevation.unwrap_or(lowest_front),
                zone_number: utm.zone_number,
                zone_letter: utm.zone_letter,
                color: ROAD_COLOR,
                front: false,
                road: true,
            }),
            Err(e) => tracing::warn!(lot = %record.id, lat, lon, error = %e, "Dropping road point"),
        }
    }

    Ok(rows)
}

/// FrontageResolved -> CsvExported
pub fn export_csv(record: &LotRecord, collab: &Collaborators) -> Result<Artifact> {
    let rows = build_rows(record, collab)?;
    let bytes = tabular::to_bytes(&rows)?;
    let path = object_path(&record.id, CSV_NAME);
    let url = collab.objects.put(&path, &bytes)?;
    Ok(Artifact {
        path,
        url,
        bytes: bytes.len() as u64,
    })
}

fn load_rows(record: &LotRecord, collab: &Collaborators) -> Result<Vec<TabularRow>> {
    let csv = require(&record.csv, "csv")?;
    let bytes = collab.objects.get(&csv.path)?;
    let text = String::from_utf8(bytes).context("Point file is not UTF-8")?;
    tabular::parse(&text)
}

/// CsvExported -> MeshExported
pub fn export_mesh(
    record: &LotRecord,
    collab: &Collaborators,
    params: &PipelineParams,
) -> Result<Artifact> {
    let rows = load_rows(record, collab)?;
    if rows.is_empty() {
        return Err(anyhow!(LotError::EmptyPointCloud));
    }

    // Re-centre so f32 vertex coordinates keep centimetre precision
    let min_x = rows.iter().map(|r| r.x).fold(f64::INFINITY, f64::min);
    let min_y = rows.iter().map(|r| r.y).fold(f64::INFINITY, f64::min);
    let points: Vec<[f64; 3]> = rows.iter().map(|r| [r.x - min_x, r.y - min_y, r.z]).collect();
    let colors: Vec<[u8; 3]> = rows.iter().map(|r| r.color).collect();

    let mesh = build_volumetric_mesh(&points, &colors, &params.terrain)?;

    let dir = params.work_dir.join(&record.id);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create work directory {}", dir.display()))?;
    let name = format!("terrain.{}", collab.exporter.extension());
    let output = dir.join(&name);
    let report = with_retry(&params.export_retry, "mesh export", || {
        collab
            .exporter
            .export(&mesh, &output)
            .map_err(Attempt::Transient)
    })?;
    tracing::debug!(lot = %record.id, bytes = report.bytes, diagnostics = %report.diagnostics, "Mesh exported");

    let bytes = fs::read(&report.path)
        .with_context(|| format!("Failed to read exported mesh {}", report.path.display()))?;
    let path = object_path(&record.id, &name);
    let url = collab.objects.put(&path, &bytes)?;
    Ok(Artifact {
        path,
        url,
        bytes: bytes.len() as u64,
    })
}

/// MeshExported -> SlopeClassified. Road rows are left out.
pub fn classify_slope(record: &LotRecord, collab: &Collaborators) -> Result<Declivity> {
    let points: Vec<SlopePoint> = load_rows(record, collab)?
        .iter()
        .filter(|r| !r.road)
        .map(SlopePoint::from)
        .collect();
    Ok(declivity(&points)?)
}
