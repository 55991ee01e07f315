//! CLI for facial-expression feature extraction and classification.
//!
//! Usage:
//!   face-mood extract <image-root> -o features.csv
//!   face-mood train features.csv -o expression.safetensors
//!   face-mood predict photo.jpg --model expression.safetensors
//!   face-mood evaluate test.csv --model expression.safetensors --json
//!
//! Set RUST_LOG=info to watch the dataset builder walk the class
//! directories.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use face_mood::{
    dataset, extract, load_gray, Expression, ExpressionModel, FaceData, FacePipeline,
    LandmarkSource, Prediction, TrainParams,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "face-mood")]
#[command(author, version, about = "Facial expression features and classification", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Face detector model path
    #[arg(long, default_value = "seeta_fd_frontal_v1.0.bin", global = true)]
    detector: PathBuf,

    /// Landmark model path
    #[arg(long, default_value = "shape_predictor_68_face_landmarks.dat", global = true)]
    landmarks: PathBuf,

    /// Minimum face size for detection
    #[arg(long, default_value = "20", global = true)]
    min_face_size: u32,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk expression class directories and write a feature dataset
    Extract {
        /// Root directory holding the six class subdirectories
        root: PathBuf,

        /// Output dataset file
        #[arg(short, long, default_value = "features.csv")]
        output: PathBuf,
    },
    /// Train a classifier from a feature dataset
    Train {
        /// Dataset file produced by `extract`
        data: PathBuf,

        /// Where to write the trained weights
        #[arg(short, long, default_value = "expression.safetensors")]
        output: PathBuf,

        /// Training epochs
        #[arg(long, default_value = "500")]
        epochs: usize,

        /// Gradient-descent learning rate
        #[arg(long, default_value = "0.05")]
        learning_rate: f64,
    },
    /// Classify the faces in one image
    Predict {
        /// Input image file
        image: PathBuf,

        /// Trained weights file
        #[arg(short, long, default_value = "expression.safetensors")]
        model: PathBuf,
    },
    /// Score a trained classifier against a labeled dataset
    Evaluate {
        /// Labeled dataset file
        data: PathBuf,

        /// Trained weights file
        #[arg(short, long, default_value = "expression.safetensors")]
        model: PathBuf,
    },
}

/// JSON payload for `extract`.
#[derive(Serialize)]
struct ExtractOutput {
    output: String,
    images: usize,
    rows: usize,
    skipped: Vec<SkippedFile>,
}

#[derive(Serialize)]
struct SkippedFile {
    file: String,
    reason: String,
}

/// JSON payload for `predict`.
#[derive(Serialize)]
struct PredictOutput {
    image: String,
    faces_detected: usize,
    faces: Vec<FaceOutput>,
}

#[derive(Serialize)]
struct FaceOutput {
    prediction: Prediction,
    features: FaceData,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        Command::Extract { root, output } => run_extract(args, root, output),
        Command::Train {
            data,
            output,
            epochs,
            learning_rate,
        } => run_train(args, data, output, *epochs, *learning_rate),
        Command::Predict { image, model } => run_predict(args, image, model),
        Command::Evaluate { data, model } => run_evaluate(args, data, model),
    }
}

fn open_pipeline(args: &Args) -> Result<FacePipeline, Box<dyn std::error::Error>> {
    let mut pipeline = FacePipeline::new(&args.detector, &args.landmarks)?;
    pipeline.set_min_face_size(args.min_face_size);
    Ok(pipeline)
}

fn run_extract(args: &Args, root: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = open_pipeline(args)?;
    let report = dataset::build(root, output, &mut pipeline)?;

    if args.json {
        let payload = ExtractOutput {
            output: output.display().to_string(),
            images: report.images,
            rows: report.rows,
            skipped: report
                .skipped
                .iter()
                .map(|(file, reason)| SkippedFile {
                    file: file.display().to_string(),
                    reason: reason.clone(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Wrote {} rows from {} images to {}",
            report.rows,
            report.images,
            output.display()
        );
        if !report.skipped.is_empty() {
            println!("Skipped {} file(s):", report.skipped.len());
            for (file, reason) in &report.skipped {
                println!("  {}: {}", file.display(), reason);
            }
        }
    }
    Ok(())
}

fn run_train(
    args: &Args,
    data: &Path,
    output: &Path,
    epochs: usize,
    learning_rate: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = dataset::read_rows(data)?;
    println!("Training on {} rows...", rows.len());

    let params = TrainParams {
        epochs,
        learning_rate,
    };
    let model = ExpressionModel::train(&rows, &params)?;
    model.save(output)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "rows": rows.len(),
                "model": output.display().to_string(),
            }))?
        );
    } else {
        println!("Model written to {}", output.display());
    }
    Ok(())
}

fn run_predict(
    args: &Args,
    image: &Path,
    model_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = ExpressionModel::load(model_path)?;
    let mut pipeline = open_pipeline(args)?;

    let gray = load_gray(image)?;
    let landmark_sets = pipeline.landmarks(&gray)?;

    let mut faces = Vec::with_capacity(landmark_sets.len());
    for lm in &landmark_sets {
        let mut features = extract(lm, "Unknown")?;
        let prediction = model.predict(&features)?;
        features.label = prediction.expression.label().to_string();
        faces.push(FaceOutput {
            prediction,
            features,
        });
    }

    if args.json {
        let payload = PredictOutput {
            image: image.display().to_string(),
            faces_detected: faces.len(),
            faces,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if faces.is_empty() {
        println!("No faces found in {}", image.display());
    } else {
        for (i, face) in faces.iter().enumerate() {
            if faces.len() > 1 {
                println!("--- Face {} ---", i + 1);
            }
            let p = &face.prediction;
            println!("*** Prediction: {} ***", p.expression.label());
            let scores: Vec<String> = p.scores.iter().map(|s| format!("{:.4}", s)).collect();
            println!("*** Scores: {} ***", scores.join(" "));
        }
    }
    Ok(())
}

fn run_evaluate(
    args: &Args,
    data: &Path,
    model_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = ExpressionModel::load(model_path)?;
    let rows = dataset::read_rows(data)?;
    let metrics = model.evaluate(&rows)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        println!(
            "* Metrics for multi-class classification - {}",
            data.display()
        );
        println!("* MicroAccuracy:    {:.3}", metrics.micro_accuracy);
        println!("* MacroAccuracy:    {:.3}", metrics.macro_accuracy);
        println!("* LogLoss:          {:.3}", metrics.log_loss);
        println!("* LogLossReduction: {:.3}", metrics.log_loss_reduction);
        println!("* Per-class precision:");
        for (e, p) in Expression::ALL.iter().zip(&metrics.per_class_precision) {
            println!("*    - {} : {:.3}", e.label(), p);
        }
        println!("* Per-class recall:");
        for (e, r) in Expression::ALL.iter().zip(&metrics.per_class_recall) {
            println!("*    - {} : {:.3}", e.label(), r);
        }
    }
    Ok(())
}
