//! Walkthrough of training a small classifier with `toy_classifier`
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! cargo run
//! ```
//!
//! Defines a two hidden layer MLP, trains it on five 2-D points, evaluates it, saves and
//! reloads its parameters and reports whether an accelerator device is available.
//! Defaults reproduce the reference run: 3 epochs, batch size 2, learning rate 0.5, seed 123.

use std::{error::Error, fs, path::PathBuf};

use clap::Parser;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use toy_classifier::{
    checkpoint,
    dataloader::DataLoader,
    datasets::{plot_data, plot_decision_boundary, toy_test_set, toy_train_set},
    metrics::{compute_accuracy, count_correct},
    nn::{Classifier, Module},
    optim::SGD,
    tensor::{Device, Tensor, accelerator_available},
    train::{TrainConfig, Trainer},
};

#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value_t = 3)]
    epochs: usize,
    #[clap(short, long, default_value_t = 2)]
    batch_size: usize,
    #[clap(short, long, default_value_t = 0.5)]
    lr: f32,
    #[clap(short, long, default_value_t = 0.0)]
    momentum: f32,
    /// Seeds both the shuffling of the training loader and the weight initialization
    #[clap(short, long, default_value_t = 123)]
    seed: u64,
    #[clap(long, default_value = "model.safetensors")]
    model_path: PathBuf,
    /// Write PNG plots of the data and the learned decision boundary
    #[clap(long, default_value_t = false)]
    plot: bool,
    #[clap(short, long, default_value_t = format!("output"))]
    output_dir: String,
}

const SEPARATOR: &str = "-------------------------";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let train_ds = toy_train_set();
    let test_ds = toy_test_set();
    let (num_inputs, num_outputs) = (train_ds.num_features(), train_ds.num_classes());

    let mut rng = Pcg64Mcg::seed_from_u64(args.seed);
    let mut train_loader = DataLoader::new(train_ds.clone(), args.batch_size)?
        .shuffle(Pcg64Mcg::from_rng(&mut rng))
        .drop_last(true);
    let mut test_loader = DataLoader::new(test_ds, args.batch_size)?;

    if args.plot {
        fs::create_dir_all(&args.output_dir)?;
        plot_data(&train_ds, &format!("{}/dataset_train.png", args.output_dir), "train")?;
    }

    println!("{SEPARATOR}");
    for (idx, batch) in train_loader.iter().enumerate() {
        println!("Batch {}: {} {:?}", idx + 1, batch.features, batch.labels);
    }
    println!("{SEPARATOR}");

    let mut model = Classifier::new(num_inputs, num_outputs, &mut rng)?;
    let config = TrainConfig {
        epochs: args.epochs,
        learning_rate: args.lr,
        momentum: args.momentum,
    };
    let mut optim = SGD::with_momentum(model.parameters(), config.learning_rate, config.momentum);
    let report = Trainer::new(config).fit(&mut model, &mut optim, &mut train_loader)?;
    if let Some(loss) = report.final_loss() {
        log::info!("final batch loss: {:.4}", loss);
    }
    log::debug!("dead ReLU units on the last sample: {}", model.n_dead_neurons());

    println!("{SEPARATOR}");
    model.eval();
    let outputs = model.predict(train_ds.features())?;
    println!("{}", outputs);

    println!("{SEPARATOR}");
    let probas = outputs.softmax_rows()?;
    println!("{}", probas);

    println!("{SEPARATOR}");
    println!("Predictions - probas:");
    println!("{:?}", probas.argmax_rows()?);

    println!("{SEPARATOR}");
    let predictions = outputs.argmax_rows()?;
    println!("Predictions - outputs:");
    println!("{:?}", predictions);
    let matches = predictions
        .iter()
        .zip(train_ds.labels())
        .map(|(p, l)| p == l)
        .collect::<Vec<_>>();
    println!("{:?}", matches);
    println!("{}", count_correct(&predictions, train_ds.labels()));

    println!("{SEPARATOR}");
    println!("Compute train loader accuracy");
    println!("{}", compute_accuracy(&mut model, &mut train_loader)?);

    println!("{SEPARATOR}");
    println!("Compute test loader accuracy");
    println!("{}", compute_accuracy(&mut model, &mut test_loader)?);

    if args.plot {
        plot_decision_boundary(
            &model,
            &train_ds,
            &format!("{}/decision_boundary_train.png", args.output_dir),
            "train",
        )?;
    }

    println!("{SEPARATOR}");
    println!(
        "Save model example - layer to weights and biases mapping saved to '{}'",
        args.model_path.display()
    );
    checkpoint::save_to_file(&args.model_path, &model.state_dict())?;

    println!("{SEPARATOR}");
    println!("Example loading the model from disk");
    let mut restored = Classifier::new(num_inputs, num_outputs, &mut rng)?;
    restored.load_state_dict(&checkpoint::load_from_file(&args.model_path)?)?;
    restored.eval();
    let restored_outputs = restored.predict(train_ds.features())?;
    log::info!(
        "restored model reproduces the trained outputs: {}",
        restored_outputs == outputs
    );

    println!("{SEPARATOR}");
    println!("Check if accelerator support is available");
    println!("{}", accelerator_available());
    println!(" If no accelerator is available, some of the following examples will not run!");

    println!("{SEPARATOR}");
    println!("Some example of using accelerator support");
    let tensor_1 = Tensor::from_vec(vec![1.0, 2.0, 3.0]);
    let tensor_2 = Tensor::from_vec(vec![4.0, 5.0, 6.0]);
    println!("Adding tensors example");
    println!("{}", tensor_1.add(&tensor_2)?);

    if accelerator_available() {
        let tensor_1 = tensor_1.to(Device::Accelerator)?;
        let tensor_2 = tensor_2.to(Device::Accelerator)?;
        println!("Accelerator support available: Adding tensors on the accelerator example");
        println!("{}", tensor_1.add(&tensor_2)?);
        println!("{}", outputs.to(Device::Accelerator)?.softmax_rows()?);
    } else {
        println!("No accelerator support available for this second adding example");
    }

    Ok(())
}
