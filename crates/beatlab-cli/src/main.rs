use anyhow::{anyhow, Context, Result};
use beatlab_lib::{
    classify::{classify, Label},
    config::PipelineConfig,
    detectors::{ecg::detect_r_peaks_with_config, threshold::ThresholdStrategy},
    filter::bandpass_with_config,
    io::{
        features::{CsvFeatureSink, FeatureSink},
        parse_record_ids,
        text::{self as text_io, TextDirectory},
        wfdb::{self as wfdb_io, WfdbDirectory},
        RecordSource,
    },
    metrics::agreement::{agreement, Agreement},
    pipeline::{validate_filter, BatchRun, Outcome, RecordOutcome, RecordPipeline, RecordReport},
    plot::{record_figures, Figure, PlotBackend, Series},
    signal::{Events, TimeSeries},
    synth::{synthetic_ecg_with, SynthConfig},
    train::{read_feature_table, train_and_evaluate, TrainConfig},
};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use plotters::{coord::Shift, prelude::*};
use serde::Serialize;
use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

/// Number of leading RR/BPM values echoed by `inspect`.
const PREVIEW_INTERVALS: usize = 10;

#[derive(Parser)]
#[command(
    name = "beatlab",
    version,
    about = "ECG rhythm screening: filter, detect R-peaks, extract rate features, label"
)]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// TOML file with [filter] and [detector] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Flag overrides applied on top of the config file.
#[derive(Args, Debug, Default)]
struct PipelineArgs {
    #[arg(long)]
    low_hz: Option<f64>,
    #[arg(long)]
    high_hz: Option<f64>,
    #[arg(long)]
    order: Option<usize>,
    /// Minimum spacing between R-peaks (seconds)
    #[arg(long)]
    min_spacing_s: Option<f64>,
    #[arg(long)]
    prominence: Option<f64>,
    /// Threshold multiplier on the standard deviation
    #[arg(long)]
    threshold_k: Option<f64>,
    /// Use a sliding mean/std threshold over this many seconds
    #[arg(long)]
    threshold_window_s: Option<f64>,
}

impl PipelineArgs {
    fn resolve(&self, path: Option<&Path>) -> Result<PipelineConfig> {
        let mut cfg = match path {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(v) = self.low_hz {
            cfg.filter.low_hz = v;
        }
        if let Some(v) = self.high_hz {
            cfg.filter.high_hz = v;
        }
        if let Some(v) = self.order {
            cfg.filter.order = v;
        }
        if let Some(v) = self.min_spacing_s {
            cfg.detector.min_spacing_s = v;
        }
        if let Some(v) = self.prominence {
            cfg.detector.prominence = v;
        }
        let k = self.threshold_k.unwrap_or(match cfg.detector.threshold {
            ThresholdStrategy::Global { k } | ThresholdStrategy::Windowed { k, .. } => k,
        });
        cfg.detector.threshold = match (self.threshold_window_s, cfg.detector.threshold) {
            (Some(window_s), _) => ThresholdStrategy::Windowed { window_s, k },
            (None, ThresholdStrategy::Windowed { window_s, .. }) => {
                ThresholdStrategy::Windowed { window_s, k }
            }
            (None, ThresholdStrategy::Global { .. }) => ThresholdStrategy::Global { k },
        };
        Ok(cfg)
    }
}

/// Where a single recording comes from.
#[derive(Args, Debug)]
struct RecordInput {
    /// Newline-delimited samples; stdin when neither input is given
    #[arg(long, conflicts_with = "wfdb_header")]
    input: Option<PathBuf>,
    /// Sampling rate of text input (Hz)
    #[arg(long, default_value_t = 360.0)]
    fs: f64,
    /// WFDB header (.hea) of the record
    #[arg(long)]
    wfdb_header: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    lead: usize,
}

impl RecordInput {
    fn load(&self) -> Result<(String, TimeSeries)> {
        if let Some(header) = &self.wfdb_header {
            let ts = wfdb_io::load_wfdb_lead(header, self.lead)?;
            return Ok((record_name(header), ts));
        }
        let data = read_samples(self.input.as_deref())?;
        let name = self
            .input
            .as_deref()
            .map(record_name)
            .unwrap_or_else(|| "stdin".into());
        Ok((name, TimeSeries::new(self.fs, data)))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Process many records and write one feature row per success
    ExtractBatch {
        /// Directory of WFDB records (<id>.hea + data)
        #[arg(long, conflicts_with = "text_dir")]
        wfdb_dir: Option<PathBuf>,
        /// Directory of <id>.txt sample files
        #[arg(long)]
        text_dir: Option<PathBuf>,
        /// Sampling rate of --text-dir records (Hz)
        #[arg(long, default_value_t = 360.0)]
        fs: f64,
        #[arg(long, default_value_t = 0)]
        lead: usize,
        /// Comma-separated identifiers, ranges allowed (100,101,108-112)
        #[arg(long)]
        records: Option<String>,
        /// Inclusive numeric range, e.g. 100-234
        #[arg(long)]
        range: Option<String>,
        /// Feature table (CSV)
        #[arg(long)]
        out: PathBuf,
        /// Append to --out instead of truncating it
        #[arg(long)]
        append: bool,
        /// Write a JSON report of every record outcome
        #[arg(long)]
        report: Option<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Run one record and print every intermediate result as JSON
    Inspect {
        #[command(flatten)]
        record: RecordInput,
        /// Reference beats: WFDB .atr or newline-delimited sample indices
        #[arg(long)]
        annotations: Option<PathBuf>,
        /// Match tolerance against --annotations (seconds)
        #[arg(long, default_value_t = 0.15)]
        tolerance_s: f64,
        /// Append the feature row to this CSV on success
        #[arg(long)]
        out: Option<PathBuf>,
        /// Render diagnostic plots to a PNG
        #[arg(long)]
        plot: Option<PathBuf>,
        #[arg(long, default_value_t = 4000)]
        plot_points: usize,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Filter and detect; print R-peak indices as JSON
    FindRpeaks {
        #[command(flatten)]
        record: RecordInput,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Print the rhythm label for a mean heart rate
    Classify {
        #[arg(long)]
        bpm: f64,
    },
    /// Write a synthetic ECG-like recording as newline-delimited samples
    Synth {
        #[arg(long, default_value_t = 360.0)]
        fs: f64,
        #[arg(long, default_value_t = 75.0)]
        bpm: f64,
        #[arg(long, default_value_t = 10.0)]
        duration_s: f64,
        /// Peak-to-peak uniform noise amplitude
        #[arg(long, default_value_t = 0.0)]
        noise: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Train a random forest on a feature table and print held-out scores
    Train {
        /// Feature table written by extract-batch
        #[arg(long)]
        features: PathBuf,
        /// Fraction of rows held out for evaluation
        #[arg(long, default_value_t = 0.2)]
        test_size: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 100)]
        trees: u16,
        /// Also write the JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();
    let config = cli.config.as_deref();
    match cli.command {
        Commands::ExtractBatch {
            wfdb_dir,
            text_dir,
            fs,
            lead,
            records,
            range,
            out,
            append,
            report,
            pipeline,
        } => {
            let cfg = pipeline.resolve(config)?;
            let source: Box<dyn RecordSource> = match (wfdb_dir, text_dir) {
                (Some(dir), None) => Box::new(WfdbDirectory::new(dir, lead)),
                (None, Some(dir)) => {
                    if let Err(e) = validate_filter(&cfg, fs) {
                        warn!("every record will be skipped at {} Hz: {}", fs, e);
                    }
                    Box::new(TextDirectory::new(dir, fs))
                }
                _ => return Err(anyhow!("one of --wfdb-dir or --text-dir is required")),
            };
            cmd_extract_batch(
                source.as_ref(),
                &cfg,
                records.as_deref(),
                range.as_deref(),
                &out,
                append,
                report.as_deref(),
            )?
        }
        Commands::Inspect {
            record,
            annotations,
            tolerance_s,
            out,
            plot,
            plot_points,
            pipeline,
        } => cmd_inspect(
            &record,
            &pipeline.resolve(config)?,
            annotations.as_deref(),
            tolerance_s,
            out.as_deref(),
            plot.as_deref(),
            plot_points,
        )?,
        Commands::FindRpeaks { record, pipeline } => {
            cmd_find_rpeaks(&record, &pipeline.resolve(config)?)?
        }
        Commands::Classify { bpm } => cmd_classify(bpm)?,
        Commands::Synth {
            fs,
            bpm,
            duration_s,
            noise,
            seed,
            out,
        } => cmd_synth(
            SynthConfig {
                fs,
                bpm,
                duration_s,
                noise,
                seed,
                ..SynthConfig::default()
            },
            out.as_deref(),
        )?,
        Commands::Train {
            features,
            test_size,
            seed,
            trees,
            report,
        } => cmd_train(
            &features,
            &TrainConfig {
                test_size,
                seed,
                trees,
            },
            report.as_deref(),
        )?,
    }
    Ok(())
}

fn read_samples(input: Option<&Path>) -> Result<Vec<f64>> {
    match input {
        Some(path) => text_io::read_f64_series(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_f64_series(&buf)
        }
    }
}

fn record_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("record")
        .to_string()
}

fn load_annotation_events(path: &Path) -> Result<Events> {
    let is_atr = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("atr"));
    if is_atr {
        wfdb_io::load_wfdb_events(path)
    } else {
        Ok(Events::from_indices(text_io::read_event_indices(path)?))
    }
}

fn print_record_line(record: &RecordOutcome) {
    match &record.outcome {
        Outcome::Success(features, label) => println!(
            "{}\t{}\tmean_bpm={:.2}\tlabel={}",
            record.id,
            label,
            features.mean_bpm,
            label.code()
        ),
        Outcome::Failure { stage, error } => {
            println!("{}\tskipped\t{}\t{}", record.id, stage, error)
        }
    }
}

fn cmd_extract_batch(
    source: &dyn RecordSource,
    cfg: &PipelineConfig,
    records: Option<&str>,
    range: Option<&str>,
    out: &Path,
    append: bool,
    report: Option<&Path>,
) -> Result<()> {
    let mut ids = Vec::new();
    if let Some(list) = records {
        ids.extend(parse_record_ids(list)?);
    }
    if let Some(range) = range {
        ids.extend(parse_record_ids(range)?);
    }
    if ids.is_empty() {
        return Err(anyhow!("no records selected; pass --records and/or --range"));
    }

    let mut sink = if append {
        CsvFeatureSink::append(out)?
    } else {
        CsvFeatureSink::create(out)?
    };
    let pipeline = RecordPipeline::new(*cfg);
    info!("processing {} records into {}", ids.len(), out.display());
    let run: BatchRun = pipeline.run_batch(source, &ids, &mut sink)?;

    for record in &run.outcomes {
        print_record_line(record);
    }
    println!(
        "processed {}, written {}, skipped {}",
        run.len(),
        run.succeeded(),
        run.skipped()
    );
    if let Some(path) = report {
        let js = serde_json::to_string_pretty(&run.report())?;
        fs::write(path, js).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

#[derive(Serialize)]
struct InspectReport {
    #[serde(flatten)]
    outcome: RecordReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    label_name: Option<&'static str>,
    fs: f64,
    samples: usize,
    duration_s: f64,
    peak_count: Option<usize>,
    first_rr: Vec<f64>,
    first_bpm: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agreement: Option<Agreement>,
}

fn cmd_inspect(
    input: &RecordInput,
    cfg: &PipelineConfig,
    annotations: Option<&Path>,
    tolerance_s: f64,
    out: Option<&Path>,
    plot: Option<&Path>,
    plot_points: usize,
) -> Result<()> {
    let (id, ts) = input.load()?;
    let pipeline = RecordPipeline::new(*cfg);
    let trace = pipeline.trace(ts);
    let record = RecordOutcome {
        id: id.clone(),
        outcome: trace.outcome.clone(),
    };

    let agreement = match annotations {
        Some(path) => {
            let reference = load_annotation_events(path)?;
            let detected = trace.peaks.clone().unwrap_or_default();
            let tol = (tolerance_s * trace.raw.fs).round().max(0.0) as usize;
            Some(agreement(&reference.indices, &detected.indices, tol))
        }
        None => None,
    };

    let label_name = match &trace.outcome {
        Outcome::Success(_, label) => Some(label.name()),
        Outcome::Failure { .. } => None,
    };
    let (first_rr, first_bpm) = trace
        .rr
        .as_ref()
        .map(|rr| {
            (
                rr.rr.iter().take(PREVIEW_INTERVALS).copied().collect(),
                rr.bpm.iter().take(PREVIEW_INTERVALS).copied().collect(),
            )
        })
        .unwrap_or_default();
    let report = InspectReport {
        outcome: RecordReport::from(&record),
        label_name,
        fs: trace.raw.fs,
        samples: trace.raw.len(),
        duration_s: trace.raw.duration(),
        peak_count: trace.peaks.as_ref().map(Events::len),
        first_rr,
        first_bpm,
        agreement,
    };
    println!("{}", serde_json::to_string(&report)?);

    if let (Some(path), Outcome::Success(features, label)) = (out, &trace.outcome) {
        let mut sink = CsvFeatureSink::append(path)?;
        sink.write(&id, features, *label)?;
        sink.finish()?;
    }
    if let Some(path) = plot {
        let figures = record_figures(&id, &trace, plot_points);
        draw_plotters_figures(path, &figures)?;
    }
    Ok(())
}

fn cmd_find_rpeaks(input: &RecordInput, cfg: &PipelineConfig) -> Result<()> {
    let (_, ts) = input.load()?;
    validate_filter(cfg, ts.fs).with_context(|| format!("cannot filter at {} Hz", ts.fs))?;
    let filtered = TimeSeries::new(ts.fs, bandpass_with_config(&ts.data, ts.fs, &cfg.filter)?);
    let events = detect_r_peaks_with_config(&filtered, &cfg.detector);
    println!("{}", serde_json::to_string(&events)?);
    Ok(())
}

#[derive(Serialize)]
struct ClassifyOutput {
    bpm: f64,
    label: u8,
    name: &'static str,
}

fn cmd_classify(bpm: f64) -> Result<()> {
    if !bpm.is_finite() {
        return Err(anyhow!("bpm must be finite, got {}", bpm));
    }
    let label: Label = classify(bpm);
    let js = serde_json::to_string(&ClassifyOutput {
        bpm,
        label: label.code(),
        name: label.name(),
    })?;
    println!("{}", js);
    Ok(())
}

fn cmd_synth(cfg: SynthConfig, out: Option<&Path>) -> Result<()> {
    if !(cfg.fs > 0.0 && cfg.bpm > 0.0 && cfg.duration_s > 0.0) {
        return Err(anyhow!("fs, bpm and duration must be positive"));
    }
    let ts = synthetic_ecg_with(&cfg);
    let text = text_io::format_f64_series(&ts.data);
    match out {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn cmd_train(features: &Path, cfg: &TrainConfig, report: Option<&Path>) -> Result<()> {
    let ds = read_feature_table(features)?;
    info!(
        "loaded {} rows with {} features from {}",
        ds.len(),
        ds.columns.len(),
        features.display()
    );
    let evaluation = train_and_evaluate(&ds, cfg)?;
    let js = serde_json::to_string_pretty(&evaluation)?;
    println!("{}", js);
    if let Some(path) = report {
        fs::write(path, js).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

/// Draws successive figures into the panels of one bitmap, top to bottom.
struct PanelBackend<'a> {
    panels: Vec<DrawingArea<BitMapBackend<'a>, Shift>>,
    next: usize,
}

impl PlotBackend for PanelBackend<'_> {
    fn draw(&mut self, fig: &Figure) -> Result<()> {
        let area = self
            .panels
            .get(self.next)
            .ok_or_else(|| anyhow!("no panel left for {:?}", fig.title))?;
        self.next += 1;
        draw_plotters_figure(area, fig)
    }
}

fn draw_plotters_figures(path: &Path, figures: &[Figure]) -> Result<()> {
    let rows = figures.len().max(1);
    let root = BitMapBackend::new(path, (1200, 320 * rows as u32)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut backend = PanelBackend {
        panels: root.split_evenly((rows, 1)),
        next: 0,
    };
    for fig in figures {
        backend.draw(fig)?;
    }
    root.present()?;
    Ok(())
}

fn draw_plotters_figure(area: &DrawingArea<BitMapBackend<'_>, Shift>, fig: &Figure) -> Result<()> {
    let (x_min, mut x_max, mut y_min, mut y_max) = fig.bounds().unwrap_or((0.0, 1.0, 0.0, 1.0));
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }
    if y_max <= y_min {
        y_min -= 0.5;
        y_max += 0.5;
    }
    let pad = (y_max - y_min) * 0.05;
    y_min -= pad;
    y_max += pad;

    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 20),
        )
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                let (r, g, b) = line.style.color.rgb();
                let color = RGBColor(r, g, b);
                chart
                    .draw_series(LineSeries::new(
                        line.points.iter().map(|p| (p[0], p[1])),
                        color.stroke_width(line.style.width.round().max(1.0) as u32),
                    ))?
                    .label(line.name.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }
            Series::Points(points) => {
                let (r, g, b) = points.color.rgb();
                let style = RGBColor(r, g, b).filled();
                let radius = points.radius;
                chart
                    .draw_series(
                        points
                            .points
                            .iter()
                            .map(|p| Circle::new((p[0], p[1]), radius, style)),
                    )?
                    .label(points.name.as_str())
                    .legend(move |(x, y)| Circle::new((x + 10, y), radius, style));
            }
        }
    }
    if fig.series.len() > 1 {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}
