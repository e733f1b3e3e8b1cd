//! # Media Delivery Optimizer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom per diverse operazioni
//! - `formats`: Formati target, ordine di fallback, naming convention
//! - `probe`: Capability probing dei backend encoder (magick/cwebp/ffmpeg)
//! - `animation`: Classificazione GIF animate vs statiche
//! - `library`: Indice degli asset media (stand-in del sistema host)
//! - `resolver`: Risoluzione URL/path -> identità asset
//! - `conversion` / `image_converter` / `video_converter`: Engine di conversione
//! - `quota`: Admission control per periodo per classe di media
//! - `tracker`: Ledger idempotente delle conversioni eseguite
//! - `rewriter`: Riscrittura dei riferimenti media per la delivery
//! - `pipeline`: Orchestrazione (coordinator, coda video, backfill)
//! - `progress`: Progress tracking e statistiche sweep
//!
//! ## Utilizzo:
//! ```ignore
//! use media_delivery_optimizer::{Config, MediaLibrary, MediaPipeline};
//!
//! let mut library = MediaLibrary::open(&root, "https://x/uploads", None).await?;
//! library.scan().await?;
//! let pipeline = MediaPipeline::new(library, Config::default()).await?;
//! pipeline.ingest(asset_id).await?;
//! ```

pub mod animation;
pub mod config;
pub mod conversion;
pub mod error;
pub mod formats;
pub mod image_converter;
pub mod library;
pub mod pipeline;
pub mod platform;
pub mod probe;
pub mod progress;
pub mod quota;
pub mod resolver;
pub mod rewriter;
pub mod tracker;
pub mod utils;
pub mod video_converter;

pub use config::Config;
pub use conversion::ConversionResult;
pub use error::ConvertError;
pub use formats::{ConvertedFileSet, MediaFormat, MediaType};
pub use library::{AssetId, MediaAsset, MediaLibrary};
pub use pipeline::{BackfillSweeper, MediaPipeline};
pub use probe::{ProcessorCapability, ProcessorKind};
pub use quota::QuotaManager;
pub use resolver::AttachmentResolver;
pub use rewriter::ContentRewriter;
pub use tracker::{ConversionRecord, ConversionTracker, StatsFilter};
