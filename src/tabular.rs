//! Tabular point file: one CSV row per lot or road point

use anyhow::{Context, Result, anyhow, bail};
use std::io::Write;

pub const HEADER: &str = "x,y,z,zone_number,zone_letter,r,g,b,hex_color,front,road";

const COLUMNS: usize = 11;

/// Neutral color given to road points
pub const ROAD_COLOR: [u8; 3] = [128, 128, 128];

#[derive(Debug, Clone, PartialEq)]
pub struct TabularRow {
    /// Easting, meters
    pub x: f64,
    /// Northing, meters
    pub y: f64,
    /// Elevation, meters
    pub z: f64,
    pub zone_number: u8,
    pub zone_letter: char,
    pub color: [u8; 3],
    pub front: bool,
    pub road: bool,
}

impl TabularRow {
    pub fn hex_color(&self) -> String {
        hex_color(self.color)
    }
}

pub fn hex_color([r, g, b]: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

pub fn write_rows<W: Write>(mut out: W, rows: &[TabularRow]) -> Result<()> {
    writeln!(out, "{}", HEADER)?;
    for row in rows {
        let [r, g, b] = row.color;
        writeln!(
            out,
            "{:.3},{:.3},{:.3},{},{},{},{},{},{},{},{}",
            row.x,
            row.y,
            row.z,
            row.zone_number,
            row.zone_letter,
            r,
            g,
            b,
            row.hex_color(),
            flag(row.front),
            flag(row.road)
        )?;
    }
    out.flush()?;
    Ok(())
}

pub fn to_bytes(rows: &[TabularRow]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_rows(&mut buf, rows)?;
    Ok(buf)
}

fn parse_flag(s: &str) -> Result<bool> {
    match s {
        "0" => Ok(false),
        "1" => Ok(true),
        other => bail!("expected 0 or 1, got {:?}", other),
    }
}

fn parse_row(line: &str) -> Result<TabularRow> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != COLUMNS {
        bail!("expected {} columns, got {}", COLUMNS, fields.len());
    }

    let mut letter = fields[4].chars();
    let zone_letter = match (letter.next(), letter.next()) {
        (Some(c), None) => c,
        _ => bail!("zone letter must be one character, got {:?}", fields[4]),
    };

    Ok(TabularRow {
        x: fields[0].parse().context("x")?,
        y: fields[1].parse().context("y")?,
        z: fields[2].parse().context("z")?,
        zone_number: fields[3].parse().context("zone_number")?,
        zone_letter,
        color: [
            fields[5].parse().context("r")?,
            fields[6].parse().context("g")?,
            fields[7].parse().context("b")?,
        ],
        front: parse_flag(fields[9]).context("front")?,
        road: parse_flag(fields[10]).context("road")?,
    })
}

/// Parse a point file written by [`write_rows`]
pub fn parse(text: &str) -> Result<Vec<TabularRow>> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| anyhow!("Point file is empty"))?;
    if header.trim() != HEADER {
        bail!("Unexpected point file header: {:?}", header);
    }

    lines
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_row(line).with_context(|| format!("Point file line {}", i + 2)))
        .collect()
}
