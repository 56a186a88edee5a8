//! HTML report and histogram rendering
//!
//! The page has the upload form, an optional error block, the results table
//! and a PNG histogram of predicted goals embedded as a base64 data URI.

use std::collections::BTreeMap;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};

use crate::data::Table;
use crate::{GoalError, Result};

const BAR_WIDTH: u32 = 24;
const BAR_GAP: u32 = 4;
const MARGIN: u32 = 10;
const PLOT_HEIGHT: u32 = 200;
/// Wider ranges are not drawn
const MAX_BINS: usize = 256;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const BAR: Rgb<u8> = Rgb([70, 130, 180]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);

/// Uploaded rows with the rounded prediction column appended
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionReport {
    pub table: Table,
    pub predictions: Vec<i64>,
}

impl PredictionReport {
    /// Frequency of each goal value from the lowest to the highest prediction,
    /// including values nobody was predicted to score
    pub fn goal_counts(&self) -> Vec<(i64, usize)> {
        let (Some(&min), Some(&max)) = (self.predictions.iter().min(), self.predictions.iter().max())
        else {
            return Vec::new();
        };

        let mut counts: BTreeMap<i64, usize> = (min..=max).map(|g| (g, 0)).collect();
        for &p in &self.predictions {
            *counts.entry(p).or_insert(0) += 1;
        }
        counts.into_iter().collect()
    }

    /// Histogram PNG, base64 encoded
    pub fn histogram_base64(&self) -> Result<String> {
        let png = histogram_png(&self.goal_counts())?;
        Ok(BASE64.encode(png))
    }
}

/// Draw one bar per goal value, heights proportional to frequency
pub fn histogram_png(counts: &[(i64, usize)]) -> Result<Vec<u8>> {
    if counts.is_empty() {
        return Err(GoalError::Data("no predictions to plot".to_string()));
    }
    if counts.len() > MAX_BINS {
        return Err(GoalError::Data(format!(
            "prediction range spans {} goal values; at most {} can be plotted",
            counts.len(),
            MAX_BINS
        )));
    }

    let bins = counts.len() as u32;
    let width = 2 * MARGIN + bins * BAR_WIDTH + (bins - 1) * BAR_GAP;
    let height = 2 * MARGIN + PLOT_HEIGHT;
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    let max_count = counts.iter().map(|&(_, c)| c).max().unwrap_or(0).max(1);
    let baseline = MARGIN + PLOT_HEIGHT;

    for (i, &(_, count)) in counts.iter().enumerate() {
        let bar_height = (count as u64 * PLOT_HEIGHT as u64 / max_count as u64) as u32;
        let x0 = MARGIN + i as u32 * (BAR_WIDTH + BAR_GAP);
        for x in x0..x0 + BAR_WIDTH {
            for y in baseline - bar_height..baseline {
                img.put_pixel(x, y, BAR);
            }
        }
    }

    for x in MARGIN / 2..width - MARGIN / 2 {
        img.put_pixel(x, baseline, AXIS);
    }

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| GoalError::Data(format!("failed to encode histogram: {}", e)))?;
    Ok(buf)
}

/// What a single request renders to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub error: Option<String>,
    pub report: Option<PredictionReport>,
    /// Base64 PNG
    pub histogram: Option<String>,
}

impl Page {
    pub fn error(message: impl Into<String>) -> Self {
        Page {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Results page. A histogram that cannot be drawn is left out.
    pub fn results(report: PredictionReport) -> Self {
        let histogram = match report.histogram_base64() {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                log::warn!("Skipping histogram: {}", e);
                None
            }
        };
        Page {
            error: None,
            report: Some(report),
            histogram,
        }
    }

    pub fn render_html(&self) -> String {
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str("<title>Team Goal Predictor</title>\n</head>\n<body>\n");
        html.push_str("<h1>Team Goal Predictor</h1>\n");
        html.push_str("<form method=\"post\" enctype=\"multipart/form-data\">\n");
        html.push_str("  <input type=\"file\" name=\"csvfile\" accept=\".csv\">\n");
        html.push_str("  <input type=\"submit\" value=\"Predict\">\n</form>\n");

        if let Some(error) = &self.error {
            html.push_str(&format!("<p class=\"error\">{}</p>\n", escape_html(error)));
        }

        if let Some(report) = &self.report {
            html.push_str(&render_table(&report.table));
        }

        if let Some(encoded) = &self.histogram {
            html.push_str(&format!(
                "<img src=\"data:image/png;base64,{}\" alt=\"Histogram of predicted goals\">\n",
                encoded
            ));
        }

        html.push_str("</body>\n</html>\n");
        html
    }
}

/// Header row plus one row per record, no index column
pub fn render_table(table: &Table) -> String {
    let mut html = String::from("<table class=\"data\">\n<thead>\n<tr>");
    for header in table.headers() {
        html.push_str(&format!("<th>{}</th>", escape_html(header)));
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in table.rows() {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>\n");
    html
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
