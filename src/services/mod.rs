//! Core application services

pub mod duplicates;
pub mod filesystem;
pub mod hasher;
pub mod metadata;
pub mod notifications;
pub mod quality;
pub mod renamer;
pub mod scan;

pub use duplicates::{CopyCandidate, DuplicateResolver, RetentionPlan, RetentionPolicy, plan_retention};
pub use filesystem::{FileSystem, TokioFileSystem};
pub use hasher::{DigestRequest, DigestSet, FileHasher, StreamingHasher};
pub use metadata::{EpisodeMatch, MatchResult, MetadataClient, MetadataError, OfflineMetadataClient};
pub use notifications::{NotificationService, PipelineEvent};
pub use quality::{QualityProfile, resolution_rank, source_rank};
pub use renamer::{PatternRenamer, RenameEvaluator, RenameInput};
pub use scan::ImportScanner;
