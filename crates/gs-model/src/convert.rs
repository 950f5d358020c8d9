use std::path::{Path, PathBuf};

use tracing::{debug, info};

use gs_tensor::{ByteOrder, DataType, FileType};

use crate::architecture::Architecture;
use crate::catalog::Catalog;
use crate::error::{ModelError, Result};
use crate::gguf::reader::GgufFile;
use crate::params::Params;
use crate::serializer::{Serializer, DEFAULT_CONCURRENCY};
use crate::tokenizer::{SpecialVocab, Vocab};

/// Everything a conversion run needs to know.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Source `.gguf` model.
    pub model: PathBuf,
    /// Destination; derived from the input directory and file type if unset.
    pub outfile: Option<PathBuf>,
    /// Requested output precision; resolved from the source if unset.
    pub out_type: Option<FileType>,
    /// Overrides the source context length.
    pub ctx: Option<u32>,
    pub concurrency: usize,
    pub byte_order: ByteOrder,
    /// Accepted for compatibility; GGUF input already has its final vocab.
    pub pad_vocab: bool,
    pub architecture: Architecture,
}

impl ConvertOptions {
    pub fn new(model: impl Into<PathBuf>) -> ConvertOptions {
        ConvertOptions {
            model: model.into(),
            outfile: None,
            out_type: None,
            ctx: None,
            concurrency: DEFAULT_CONCURRENCY,
            byte_order: ByteOrder::Little,
            pad_vocab: false,
            architecture: Architecture::LLAMA,
        }
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertSummary {
    pub output: PathBuf,
    pub file_type: FileType,
    pub n_tensors: usize,
    pub bytes_written: u64,
}

/// `<input dir>/ggml-model-{type}-sorted.gguf`.
pub fn default_outfile(model: &Path, file_type: FileType) -> PathBuf {
    let name = format!("ggml-model-{}-sorted.gguf", file_type.short_name());
    match model.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Pick the output file type: an explicit request wins, then the source's
/// recorded file type, then a guess from the source tensors.
pub fn resolve_file_type(
    requested: Option<FileType>,
    params: &Params,
    catalog: &Catalog<'_>,
) -> Result<FileType> {
    if let Some(file_type) = requested {
        return Ok(file_type);
    }
    if let Some(file_type) = params.file_type()? {
        return Ok(file_type);
    }
    Ok(guess_file_type(catalog))
}

/// Infer a file type from the stored types of multi-dimensional tensors.
pub fn guess_file_type(catalog: &Catalog<'_>) -> FileType {
    let matrix_types = || {
        catalog
            .iter()
            .filter(|t| t.shape.ndim() > 1)
            .map(|t| t.data_type)
    };
    if matrix_types().any(|t| t == DataType::Q8_0) {
        FileType::MostlyQ8_0
    } else if matrix_types().any(|t| matches!(t, DataType::F16 | DataType::BF16)) {
        FileType::MostlyF16
    } else {
        FileType::AllF32
    }
}

/// Rewrite `options.model` with its tensors in canonical order.
///
/// Metadata extraction, tensor cataloguing and sorting all complete before
/// the output path is touched.
pub fn convert(options: &ConvertOptions) -> Result<ConvertSummary> {
    let model = &options.model;
    if model.extension().and_then(|e| e.to_str()) != Some("gguf") {
        return Err(ModelError::InvalidInputExtension(model.clone()));
    }
    if options.out_type == Some(FileType::MostlyQ8_0) && ByteOrder::native().is_big() {
        return Err(ModelError::BigEndianUnsupported(DataType::Q8_0));
    }

    info!(path = %model.display(), "Loading model file");
    let file = GgufFile::open(model)?;
    let arch = options.architecture;

    let mut params = Params::from_gguf(&file.metadata, &arch)?;
    if let Some(ctx) = options.ctx {
        info!(from = params.n_ctx, to = ctx, "Overriding context length");
        params.n_ctx = ctx;
    }
    debug!(?params, "model parameters");

    let vocab = Vocab::from_gguf(&file.metadata)?;
    let special = SpecialVocab::from_gguf(&file.metadata)?;
    info!(
        tokens = vocab.len(),
        special = special.special_token_ids.len(),
        "Loaded vocabulary"
    );
    if options.pad_vocab {
        info!("Vocabulary padding requested; GGUF input is written unpadded");
    }

    let catalog = Catalog::from_gguf(&file)?.sort_layers()?;
    let file_type = resolve_file_type(options.out_type, &params, &catalog)?;
    let output = options
        .outfile
        .clone()
        .unwrap_or_else(|| default_outfile(model, file_type));

    let serializer = Serializer::new(output, model, options.byte_order, file_type, arch)?
        .with_concurrency(options.concurrency);
    let bytes_written = serializer.write_all(&params, &vocab, &special, &catalog)?;

    info!(path = %serializer.path().display(), bytes_written, "Model successfully exported");
    Ok(ConvertSummary {
        output: serializer.path().to_path_buf(),
        file_type: serializer.file_type(),
        n_tensors: catalog.len(),
        bytes_written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::metadata::GgufMetadataValue;
    use crate::test_util::{f32_bytes, llama_metadata, write_gguf, SourceTensor};
    use half::f16;

    fn f16_bytes(values: &[f32]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect()
    }

    /// Tensors of a tiny two-layer model, deliberately out of order.
    fn shuffled_tensors() -> Vec<SourceTensor<'static>> {
        vec![
            ("output_norm.weight", vec![32], DataType::F32, f32_bytes(&[1.0; 32])),
            ("blk.1.attn_q.weight", vec![32, 2], DataType::F16, f16_bytes(&[0.5; 64])),
            ("output.weight", vec![32, 3], DataType::F16, f16_bytes(&[0.25; 96])),
            ("blk.0.attn_norm.weight", vec![32], DataType::F32, f32_bytes(&[2.0; 32])),
            ("token_embd.weight", vec![32, 3], DataType::F16, f16_bytes(&[-1.0; 96])),
            ("blk.0.attn_output.weight", vec![32, 2], DataType::F16, f16_bytes(&[4.0; 64])),
        ]
    }

    fn source(dir: &Path) -> PathBuf {
        let path = dir.join("model.gguf");
        write_gguf(&path, &llama_metadata(), &shuffled_tensors());
        path
    }

    #[test]
    fn test_default_outfile() {
        assert_eq!(
            default_outfile(Path::new("/models/7b/model.gguf"), FileType::MostlyQ8_0),
            PathBuf::from("/models/7b/ggml-model-q8_0-sorted.gguf")
        );
        assert_eq!(
            default_outfile(Path::new("model.gguf"), FileType::AllF32),
            PathBuf::from("ggml-model-f32-sorted.gguf")
        );
    }

    #[test]
    fn test_sorted_output_with_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let summary = convert(&ConvertOptions::new(source(dir.path()))).unwrap();

        // No outtype and no general.file_type: guessed from the F16 matrices.
        assert_eq!(summary.file_type, FileType::MostlyF16);
        assert_eq!(summary.output, dir.path().join("ggml-model-f16-sorted.gguf"));
        assert_eq!(summary.n_tensors, 6);

        let out = GgufFile::open(&summary.output).unwrap();
        let names: Vec<&str> = out.tensor_infos.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "token_embd.weight",
                "blk.0.attn_norm.weight",
                "blk.0.attn_output.weight",
                "blk.1.attn_q.weight",
                "output.weight",
                "output_norm.weight",
            ]
        );
        assert_eq!(out.get_tensor_f32("blk.0.attn_output.weight").unwrap(), vec![4.0; 64]);
        assert_eq!(out.get_tensor_f32("output_norm.weight").unwrap(), vec![1.0; 32]);
    }

    #[test]
    fn test_rank_one_tensors_stay_f32() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ConvertOptions::new(source(dir.path()));
        options.out_type = Some(FileType::MostlyQ8_0);
        let summary = convert(&options).unwrap();

        let out = GgufFile::open(&summary.output).unwrap();
        for info in &out.tensor_infos {
            let expected = if info.shape.ndim() == 1 {
                DataType::F32
            } else {
                DataType::Q8_0
            };
            assert_eq!(info.dtype, expected, "{}", info.name);
        }
        assert_eq!(out.metadata.get_u32("general.file_type").unwrap(), 7);
    }

    #[test]
    fn test_missing_block_count_creates_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.gguf");
        let mut md = llama_metadata();
        md.entries.remove("llama.block_count");
        write_gguf(&model, &md, &shuffled_tensors());

        let mut options = ConvertOptions::new(&model);
        options.outfile = Some(dir.path().join("out.gguf"));
        let err = convert(&options).unwrap_err();
        assert!(matches!(err, ModelError::MissingRequiredField(k) if k == "llama.block_count"));
        assert!(!dir.path().join("out.gguf").exists());
        assert!(!dir.path().join("ggml-model-f16-sorted.gguf").exists());
    }

    #[test]
    fn test_big_endian_q8_0_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ConvertOptions::new(source(dir.path()));
        options.out_type = Some(FileType::MostlyQ8_0);
        options.byte_order = ByteOrder::Big;
        let err = convert(&options).unwrap_err();
        assert!(matches!(err, ModelError::BigEndianUnsupported(DataType::Q8_0)));
        assert!(!dir.path().join("ggml-model-q8_0-sorted.gguf").exists());
    }

    #[test]
    fn test_q8_0_requires_little_endian_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ConvertOptions::new(source(dir.path()));
        options.out_type = Some(FileType::MostlyQ8_0);
        let result = convert(&options);
        if ByteOrder::native().is_big() {
            assert!(matches!(result, Err(ModelError::BigEndianUnsupported(DataType::Q8_0))));
        } else {
            assert_eq!(result.unwrap().file_type, FileType::MostlyQ8_0);
        }
    }

    #[test]
    fn test_big_endian_f32_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ConvertOptions::new(source(dir.path()));
        options.out_type = Some(FileType::AllF32);
        options.byte_order = ByteOrder::Big;
        let summary = convert(&options).unwrap();

        let out = GgufFile::open(&summary.output).unwrap();
        assert_eq!(out.byte_order(), ByteOrder::Big);
        assert_eq!(out.metadata.get_u32("llama.context_length").unwrap(), 4096);
        assert_eq!(out.get_tensor_f32("token_embd.weight").unwrap(), vec![-1.0; 96]);
    }

    #[test]
    fn test_output_collision() {
        let dir = tempfile::tempdir().unwrap();
        let model = source(dir.path());
        let mut options = ConvertOptions::new(&model);
        options.outfile = Some(model.clone());
        let err = convert(&options).unwrap_err();
        assert!(matches!(err, ModelError::OutputCollision(_)));
        // The input is untouched.
        assert!(GgufFile::open(&model).is_ok());
    }

    #[test]
    fn test_rejects_non_gguf_input() {
        let err = convert(&ConvertOptions::new("weights.bin")).unwrap_err();
        assert!(matches!(err, ModelError::InvalidInputExtension(_)));
    }

    #[test]
    fn test_ctx_override_changes_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ConvertOptions::new(source(dir.path()));
        options.ctx = Some(2048);
        options.concurrency = 1;
        let summary = convert(&options).unwrap();
        let out = GgufFile::open(&summary.output).unwrap();
        assert_eq!(out.metadata.get_u32("llama.context_length").unwrap(), 2048);
        assert_eq!(out.metadata.get_string("general.name").unwrap(), "LLaMA");
    }

    #[test]
    fn test_source_file_type_used() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.gguf");
        let mut md = llama_metadata();
        md.entries
            .insert("general.file_type".into(), GgufMetadataValue::U32(0));
        write_gguf(&model, &md, &shuffled_tensors());

        let summary = convert(&ConvertOptions::new(&model)).unwrap();
        assert_eq!(summary.file_type, FileType::AllF32);

        md.entries
            .insert("general.file_type".into(), GgufMetadataValue::U32(2));
        write_gguf(&model, &md, &shuffled_tensors());
        let err = convert(&ConvertOptions::new(&model)).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedQuantization(_)));
    }

    #[test]
    fn test_unrecognized_tensor_name() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.gguf");
        let mut tensors = shuffled_tensors();
        tensors.push(("rope_freqs.weight", vec![4], DataType::F32, f32_bytes(&[1.0; 4])));
        write_gguf(&model, &llama_metadata(), &tensors);

        let err = convert(&ConvertOptions::new(&model)).unwrap_err();
        assert!(matches!(err, ModelError::UnrecognizedLayerName(n) if n == "rope_freqs.weight"));
    }
}
