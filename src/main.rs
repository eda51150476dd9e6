// projeto: lstmseqtrain
// file: src/main.rs
// Treinamento e previsão de séries de commodities (WTI, GOLD, US DOLLAR INDEX)

use chrono::Utc;
use clap::Parser;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use lstmseqtrain::neural::config::{FitOn, PipelineConfig};
use lstmseqtrain::neural::data::{DelimiterHint, Table};
use lstmseqtrain::neural::inference::Forecaster;
use lstmseqtrain::neural::metrics::write_history_csv;
use lstmseqtrain::neural::model::DenseRegressor;
use lstmseqtrain::neural::pipeline::TrainingPipeline;
use lstmseqtrain::neural::scaler::ScalerKind;
use lstmseqtrain::neural::sequence::TargetMode;
use lstmseqtrain::neural::storage::{ArtifactFormat, FileModelStore, LoadOutcome, ModelStore, SavedModel};
use lstmseqtrain::neural::trainer::{ChannelObserver, TrainingController, TrainingEvent};
use lstmseqtrain::neural::utils::TrainingError;

#[derive(Parser, Debug)]
#[command(
    name = "neural-train",
    version = "0.1.0",
    about = "Treinamento de modelos de sequência sobre séries de commodities",
    long_about = "Carrega um CSV (vírgula ou ponto e vírgula, decimal europeu aceito), normaliza as colunas, monta janelas deslizantes com divisão cronológica e treina um regressor com parada antecipada e persistência do modelo."
)]
struct Cli {
    /// Arquivo TOML de configuração (valores ausentes usam o padrão)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Caminho do CSV de entrada
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Separador do CSV
    #[arg(long, value_enum)]
    delimiter: Option<DelimiterArg>,

    /// Colunas de entrada, separadas por vírgula
    #[arg(long, value_delimiter = ',')]
    features: Option<Vec<String>>,

    /// Coluna(s) alvo, separadas por vírgula
    #[arg(long, value_delimiter = ',')]
    target: Option<Vec<String>>,

    /// Comprimento da janela de entrada
    #[arg(long, help = "Número de dias históricos por janela")]
    seq_length: Option<usize>,

    /// Número de épocas de treinamento
    #[arg(long)]
    epochs: Option<usize>,

    /// Tamanho do lote para treinamento
    #[arg(long)]
    batch_size: Option<usize>,

    /// Razão de divisão treino/teste
    #[arg(long, help = "Proporção das janelas para treinamento")]
    train_split: Option<f64>,

    /// Estratégia de normalização
    #[arg(long, value_enum)]
    scaler: Option<ScalerArg>,

    /// Ajustar o normalizador em todas as linhas (vazamento do conjunto de teste)
    #[arg(long)]
    fit_on_all: bool,

    /// Alvo numérico ou direção (alta/baixa)
    #[arg(long, value_enum)]
    target_mode: Option<TargetModeArg>,

    /// Early stopping patience (0 desativa)
    #[arg(long, help = "Épocas sem melhoria para parar")]
    patience: Option<usize>,

    /// Diretório do repositório de modelos
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Nome do modelo no repositório
    #[arg(long)]
    model_name: Option<String>,

    /// Formato do artefato salvo
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Carregar o modelo salvo e prever o próximo passo (treina se não existir)
    #[arg(long)]
    predict: bool,

    /// Modo verboso de logging
    #[arg(long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DelimiterArg {
    Auto,
    Comma,
    Semicolon,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ScalerArg {
    MinMax,
    Robust,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TargetModeArg {
    Value,
    Direction,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Json,
    Bincode,
}

impl From<DelimiterArg> for DelimiterHint {
    fn from(arg: DelimiterArg) -> Self {
        match arg {
            DelimiterArg::Auto => DelimiterHint::Auto,
            DelimiterArg::Comma => DelimiterHint::Comma,
            DelimiterArg::Semicolon => DelimiterHint::Semicolon,
        }
    }
}

impl From<ScalerArg> for ScalerKind {
    fn from(arg: ScalerArg) -> Self {
        match arg {
            ScalerArg::MinMax => ScalerKind::MinMax,
            ScalerArg::Robust => ScalerKind::Robust,
        }
    }
}

impl From<TargetModeArg> for TargetMode {
    fn from(arg: TargetModeArg) -> Self {
        match arg {
            TargetModeArg::Value => TargetMode::Value,
            TargetModeArg::Direction => TargetMode::Direction,
        }
    }
}

impl From<FormatArg> for ArtifactFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => ArtifactFormat::Json,
            FormatArg::Bincode => ArtifactFormat::Bincode,
        }
    }
}

fn main() -> Result<(), TrainingError> {
    let cli = Cli::parse();

    // Configurar logging
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    info!("🚀 Sistema de treinamento de sequências iniciado");
    info!("🕐 Iniciado em: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    let result = build_config(&cli).and_then(|config| {
        info!(
            "📊 Janela: {} | Épocas: {} | Lote: {} | Normalização: {:?} | Alvo: {:?} {:?}",
            config.sequence.length,
            config.training.epochs,
            config.training.batch_size,
            config.scaler.kind,
            config.sequence.target_mode,
            config.data.target_columns
        );
        let pipeline = TrainingPipeline::new(config)?;
        if cli.predict {
            predict_next(&pipeline)
        } else {
            train_and_save(&pipeline).map(|_| ())
        }
    });

    let elapsed = start_time.elapsed();
    match result {
        Ok(_) => {
            info!("✅ Concluído com sucesso em {:.2}s", elapsed.as_secs_f64());
            info!("🏁 Finalizado em: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        }
        Err(e) => {
            error!("❌ Erro: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

/// Arquivo de configuração (ou padrão) com as flags da linha de comando por cima.
fn build_config(cli: &Cli) -> Result<PipelineConfig, TrainingError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(csv) = &cli.csv {
        config.data.path = csv.clone();
    }
    if let Some(delimiter) = cli.delimiter {
        config.data.delimiter = delimiter.into();
    }
    if let Some(features) = &cli.features {
        config.data.feature_columns = features.iter().map(|f| f.trim().to_string()).collect();
    }
    if let Some(target) = &cli.target {
        config.data.target_columns = target.iter().map(|t| t.trim().to_string()).collect();
    }
    if let Some(length) = cli.seq_length {
        config.sequence.length = length;
    }
    if let Some(epochs) = cli.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(split) = cli.train_split {
        config.sequence.train_fraction = split;
    }
    if let Some(scaler) = cli.scaler {
        config.scaler.kind = scaler.into();
    }
    if cli.fit_on_all {
        config.scaler.fit_on = FitOn::All;
    }
    if let Some(mode) = cli.target_mode {
        config.sequence.target_mode = mode.into();
    }
    if let Some(patience) = cli.patience {
        config.training.patience = patience;
    }
    if let Some(dir) = &cli.store_dir {
        config.storage.dir = dir.clone();
    }
    if let Some(name) = &cli.model_name {
        config.storage.name = name.clone();
    }
    if let Some(format) = cli.format {
        config.storage.format = format.into();
    }

    debug!("Configuração efetiva: {:?}", config);
    Ok(config)
}

fn open_store(config: &PipelineConfig) -> Result<FileModelStore, TrainingError> {
    FileModelStore::new(&config.storage.dir, config.storage.format)
}

/// Treina um modelo novo sobre o CSV configurado e salva no repositório.
fn train_and_save(pipeline: &TrainingPipeline) -> Result<SavedModel, TrainingError> {
    let config = pipeline.config();
    let table = pipeline.load_table()?;
    train_on(pipeline, &table)?;

    let mut store = open_store(config)?;
    match store.load(&config.storage.name)? {
        LoadOutcome::Found(saved) => Ok(*saved),
        LoadOutcome::NotFound => Err(TrainingError::Model(format!(
            "model '{}' was saved but cannot be read back",
            config.storage.name
        ))),
    }
}

fn train_on(pipeline: &TrainingPipeline, table: &Table) -> Result<(), TrainingError> {
    let config = pipeline.config();
    let controller = TrainingController::new();

    // progresso vai por canal para uma thread de log
    let (tx, rx) = mpsc::channel();
    let printer = thread::spawn(move || {
        for event in rx {
            match event {
                TrainingEvent::Started { max_epochs } => debug!("[Progress] started, {} epochs", max_epochs),
                TrainingEvent::Epoch {
                    epoch,
                    loss,
                    validation_loss,
                    history_len,
                } => debug!(
                    "[Progress] epoch {} loss {:.6} val_loss {:.6} ({} recorded)",
                    epoch + 1,
                    loss,
                    validation_loss,
                    history_len
                ),
                TrainingEvent::Finished { state } => debug!("[Progress] finished: {:?}", state),
            }
        }
    });

    let mut observer = ChannelObserver::new(tx);
    observer.started(config.training.epochs);
    let mut model = DenseRegressor::new();
    let report = pipeline.run(table, &mut model, &controller, Some(&mut observer));
    drop(observer);
    if printer.join().is_err() {
        warn!("⚠️ Thread de progresso terminou com pânico");
    }
    let report = report?;

    info!(
        "📦 Janelas: {} treino | {} teste | {} descartadas",
        report.train_windows, report.test_windows, report.discarded_windows
    );

    let mut store = open_store(config)?;
    let handle = pipeline.persist(&report, &model, &mut store, &config.storage.name)?;
    info!("💾 Modelo salvo: {} ({} bytes)", handle.location, handle.bytes);

    let history_path = store.dir().join(format!("{}_history.csv", handle.name));
    write_history_csv(&report.outcome.history, &history_path)?;
    Ok(())
}

/// Carrega o modelo salvo e prevê o próximo passo; sem modelo salvo, treina antes.
fn predict_next(pipeline: &TrainingPipeline) -> Result<(), TrainingError> {
    let config = pipeline.config();
    let table = pipeline.load_table()?;
    let store = open_store(config)?;

    let saved = match store.load(&config.storage.name)? {
        LoadOutcome::Found(saved) => *saved,
        LoadOutcome::NotFound => {
            warn!(
                "⚠️ Modelo '{}' não encontrado em {}, treinando um novo",
                config.storage.name,
                config.storage.dir.display()
            );
            train_on(pipeline, &table)?;
            open_store(config)?
                .load(&config.storage.name)?
                .into_option()
                .ok_or_else(|| {
                    TrainingError::Model(format!(
                        "model '{}' was saved but cannot be read back",
                        config.storage.name
                    ))
                })?
        }
    };

    if saved.sequence.feature_columns != config.data.feature_columns {
        warn!(
            "⚠️ Modelo treinado com colunas {:?}, configuração pede {:?}; usando as do modelo",
            saved.sequence.feature_columns, config.data.feature_columns
        );
    }

    let forecaster = Forecaster::from_saved(&saved)?;
    let forecast = forecaster.forecast_next(&table)?;
    for out in &forecast.outputs {
        match forecast.mode {
            TargetMode::Value => info!("🔮 Previsão {} (+{}): {:.4}", out.column, forecast.horizon, out.value),
            TargetMode::Direction => info!(
                "🔮 Direção {} (+{}): {} ({:.2}%)",
                out.column,
                forecast.horizon,
                if out.value >= 0.5 { "alta" } else { "baixa" },
                out.value * 100.0
            ),
        }
    }
    Ok(())
}
