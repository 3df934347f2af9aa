use crate::{
    pipeline::RecordTrace,
    signal::Events,
};
use serde::{Deserialize, Serialize};

/// Seconds shown by the zoomed detection view.
pub const ZOOM_SECONDS: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub const RAW: Color = Color(0x1F77B4);
    pub const FILTERED: Color = Color(0x2CA02C);
    pub const PEAK: Color = Color(0xD62728);

    pub fn rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

/// Unconnected markers, e.g. detected peaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub radius: u32,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Points(PointSeries),
}

impl Series {
    /// Legend entry.
    pub fn name(&self) -> &str {
        match self {
            Series::Line(line) => &line.name,
            Series::Points(points) => &points.name,
        }
    }

    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Series::Line(line) => &line.points,
            Series::Points(points) => &points.points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn with_axes(mut self, x: &str, y: &str) -> Self {
        self.x.label = Some(x.into());
        self.y.label = Some(y.into());
        self
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// `(x_min, x_max, y_min, y_max)` over every series, ignoring non-finite
    /// points. `None` when nothing is plottable.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut acc: Option<(f64, f64, f64, f64)> = None;
        for p in self.series.iter().flat_map(|s| s.points().iter()) {
            if !(p[0].is_finite() && p[1].is_finite()) {
                continue;
            }
            acc = Some(match acc {
                None => (p[0], p[0], p[1], p[1]),
                Some((x0, x1, y0, y1)) => {
                    (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1]))
                }
            });
        }
        acc
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

fn trace_line(
    name: &str,
    data: &[f64],
    fs: f64,
    start: usize,
    max_points: usize,
    color: Color,
) -> Series {
    let dt = 1.0 / fs;
    let points: Vec<[f64; 2]> = data
        .iter()
        .enumerate()
        .map(|(i, value)| [(start + i) as f64 * dt, *value])
        .collect();
    Series::Line(LineSeries {
        name: name.into(),
        points: decimate_points(&points, max_points),
        style: Style {
            width: 1.4,
            color,
        },
    })
}

fn peak_markers(data: &[f64], fs: f64, peaks: &[usize]) -> Series {
    Series::Points(PointSeries {
        name: "R-peaks".into(),
        points: peaks
            .iter()
            .filter_map(|&i| data.get(i).map(|v| [i as f64 / fs, *v]))
            .collect(),
        radius: 3,
        color: Color::PEAK,
    })
}

/// Signal against time in seconds.
pub fn figure_from_samples(
    title: &str,
    data: &[f64],
    fs: f64,
    max_points: usize,
    color: Color,
) -> Figure {
    let mut fig = Figure::new(Some(title.into())).with_axes("time (s)", "amplitude");
    fig.add_series(trace_line(title, data, fs, 0, max_points, color));
    fig
}

/// Filtered signal with detected peaks marked, restricted to samples
/// `[start, end)`. Lines are not decimated so peaks stay on the trace.
pub fn figure_with_peaks(
    title: &str,
    filtered: &[f64],
    fs: f64,
    peaks: &Events,
    start: usize,
    end: usize,
) -> Figure {
    let end = end.min(filtered.len());
    let start = start.min(end);
    let mut fig = Figure::new(Some(title.into())).with_axes("time (s)", "amplitude");
    fig.add_series(trace_line(
        "filtered",
        &filtered[start..end],
        fs,
        start,
        usize::MAX,
        Color::FILTERED,
    ));
    fig.add_series(peak_markers(filtered, fs, &peaks.within(start, end)));
    fig
}

/// Diagnostic views of one traced record: raw, filtered, filtered with
/// peaks, and the first [`ZOOM_SECONDS`] with peaks. Views for stages the
/// record never reached are left out.
pub fn record_figures(id: &str, trace: &RecordTrace, max_points: usize) -> Vec<Figure> {
    let fs = trace.raw.fs;
    let mut figures = vec![figure_from_samples(
        &format!("{} raw", id),
        &trace.raw.data,
        fs,
        max_points,
        Color::RAW,
    )];
    let Some(filtered) = trace.filtered.as_deref() else {
        return figures;
    };
    figures.push(figure_from_samples(
        &format!("{} filtered", id),
        filtered,
        fs,
        max_points,
        Color::FILTERED,
    ));
    if let Some(peaks) = &trace.peaks {
        let mut full = Figure::new(Some(format!("{} detected R-peaks", id)))
            .with_axes("time (s)", "amplitude");
        full.add_series(trace_line(
            "filtered",
            filtered,
            fs,
            0,
            max_points,
            Color::FILTERED,
        ));
        full.add_series(peak_markers(filtered, fs, &peaks.indices));
        figures.push(full);

        let zoom_end = (ZOOM_SECONDS * fs).round() as usize;
        figures.push(figure_with_peaks(
            &format!("{} first {} s", id, ZOOM_SECONDS),
            filtered,
            fs,
            peaks,
            0,
            zoom_end,
        ));
    }
    figures
}
