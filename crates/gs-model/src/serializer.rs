use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use gs_tensor::{quant, ByteOrder, DataType, FileType};

use crate::architecture::Architecture;
use crate::catalog::{Catalog, TensorDescriptor};
use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadataValue as V;
use crate::gguf::writer::GgufWriter;
use crate::params::{Params, KEY_FILE_TYPE};
use crate::tokenizer::special::SpecialVocab;
use crate::tokenizer::vocab::{Vocab, KEY_MODEL, KEY_SCORES, KEY_TOKENS, KEY_TOKEN_TYPE};

/// Number of tensors converted in parallel unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Resolved on-disk type and payload length of one output tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorPlan {
    pub data_type: DataType,
    pub n_bytes: usize,
}

/// Writes a converted model to a destination GGUF file.
///
/// The output file is only created once all metadata and the whole
/// tensor-info directory have been staged, so failures in extraction or
/// planning never touch the destination. A failure after creation removes
/// the partial file.
#[derive(Debug, Clone)]
pub struct Serializer {
    path: PathBuf,
    byte_order: ByteOrder,
    file_type: FileType,
    architecture: Architecture,
    concurrency: usize,
}

impl Serializer {
    /// Bind to `path`. Fails with `OutputCollision` if `path` resolves to
    /// `source`, and with `BigEndianUnsupported` for big-endian Q8_0 output.
    pub fn new(
        path: impl Into<PathBuf>,
        source: &Path,
        byte_order: ByteOrder,
        file_type: FileType,
        architecture: Architecture,
    ) -> Result<Serializer> {
        let path = path.into();
        if paths_collide(&path, source) {
            return Err(ModelError::OutputCollision(path));
        }
        if byte_order.is_big() && file_type.data_type() == DataType::Q8_0 {
            return Err(ModelError::BigEndianUnsupported(DataType::Q8_0));
        }
        Ok(Serializer {
            path,
            byte_order,
            file_type,
            architecture,
            concurrency: DEFAULT_CONCURRENCY,
        })
    }

    /// Number of tensors converted in parallel (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Serializer {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Resolve the output type and byte length of every tensor, in catalog
    /// order. This must complete before the directory is written.
    pub fn plan(&self, catalog: &Catalog<'_>) -> Result<Vec<TensorPlan>> {
        catalog
            .iter()
            .map(|t| {
                let data_type = self.file_type.type_for_tensor(&t.shape);
                let n_bytes = data_type
                    .elements_to_bytes(t.numel())
                    .map_err(|e| ModelError::for_tensor(&t.name, e))?;
                debug!(tensor = %t.name, from = %t.data_type, to = %data_type, n_bytes, "planned");
                Ok(TensorPlan { data_type, n_bytes })
            })
            .collect()
    }

    /// Stage all metadata in the fixed output order.
    pub fn add_metadata(
        &self,
        writer: &mut GgufWriter,
        params: &Params,
        vocab: &Vocab,
        special: &SpecialVocab,
    ) -> Result<()> {
        let arch = &self.architecture;

        writer.add_kv("general.architecture", V::String(arch.name.to_string()));
        writer.add_kv("general.name", V::String(arch.model_name(params.n_ctx)));

        writer.add_kv(arch.key("context_length"), V::U32(params.n_ctx));
        writer.add_kv(arch.key("embedding_length"), V::U32(params.n_embd));
        writer.add_kv(arch.key("block_count"), V::U32(params.n_layer));
        writer.add_kv(arch.key("feed_forward_length"), V::U32(params.n_ff));
        writer.add_kv(
            arch.key("rope.dimension_count"),
            V::U32(params.rope_dimension_count()),
        );
        writer.add_kv(arch.key("attention.head_count"), V::U32(params.n_head));
        writer.add_kv(arch.key("attention.head_count_kv"), V::U32(params.n_head_kv));

        if let Some(n) = params.n_experts.filter(|&n| n > 0) {
            writer.add_kv(arch.key("expert_count"), V::U32(n));
        }
        if let Some(n) = params.n_experts_used.filter(|&n| n > 0) {
            writer.add_kv(arch.key("expert_used_count"), V::U32(n));
        }

        let eps_key = arch.key("attention.layer_norm_rms_epsilon");
        let eps = params
            .f_norm_eps
            .ok_or_else(|| ModelError::MissingRequiredField(eps_key.clone()))?;
        writer.add_kv(eps_key, V::F32(eps));

        if let Some(base) = params.f_rope_freq_base {
            writer.add_kv(arch.key("rope.freq_base"), V::F32(base));
        }

        if let Some(scaling) = params.rope_scaling_type {
            let factor = params
                .f_rope_scale
                .ok_or_else(|| ModelError::MissingRequiredField(arch.key("rope.scaling.factor")))?;
            writer.add_kv(arch.key("rope.scaling.type"), V::String(scaling.to_string()));
            writer.add_kv(arch.key("rope.scaling.factor"), V::F32(factor));
        }
        if let Some(n) = params.n_orig_ctx {
            writer.add_kv(arch.key("rope.scaling.original_context_length"), V::U32(n));
        }
        if let Some(finetuned) = params.rope_finetuned {
            writer.add_kv(arch.key("rope.scaling.finetuned"), V::Bool(finetuned));
        }

        writer.add_kv(KEY_FILE_TYPE, V::U32(self.file_type.to_gguf()));

        writer.add_kv(KEY_MODEL, V::String(vocab.model.clone()));
        writer.add_kv(KEY_TOKENS, V::string_array(&vocab.tokens));
        writer.add_kv(KEY_SCORES, V::f32_array(&vocab.scores));
        writer.add_kv(KEY_TOKEN_TYPE, V::i32_array(&vocab.token_type_ids()));

        special.add_to_gguf(writer);
        Ok(())
    }

    /// Write the whole output file. Returns the number of bytes written.
    pub fn write_all(
        &self,
        params: &Params,
        vocab: &Vocab,
        special: &SpecialVocab,
        catalog: &Catalog<'_>,
    ) -> Result<u64> {
        let mut writer = GgufWriter::new(self.byte_order);
        self.add_metadata(&mut writer, params, vocab, special)?;

        debug!(n_kv = writer.kv_count(), "staged metadata");

        let plan = self.plan(catalog)?;
        for (tensor, p) in catalog.iter().zip(&plan) {
            writer.add_tensor_info(&tensor.name, &tensor.shape, p.data_type, p.n_bytes);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()?;

        info!(path = %self.path.display(), byte_order = %self.byte_order, "Writing output");
        let mut out = BufWriter::new(File::create(&self.path)?);
        let result = self.stream(&mut writer, &mut out, &pool, catalog, &plan);
        drop(out);
        discard_on_error(&self.path, result)
    }

    fn stream(
        &self,
        writer: &mut GgufWriter,
        out: &mut impl Write,
        pool: &ThreadPool,
        catalog: &Catalog<'_>,
        plan: &[TensorPlan],
    ) -> Result<u64> {
        writer.write_header_and_kv(out)?;
        writer.write_ti_data(out)?;

        let start = Instant::now();
        let total = catalog.len();
        let jobs: Vec<(&TensorDescriptor<'_>, &TensorPlan)> = catalog.iter().zip(plan).collect();
        let src_order = catalog.byte_order();

        for (w, window) in jobs.chunks(self.concurrency).enumerate() {
            let converted: Vec<_> = pool.install(|| {
                window
                    .par_iter()
                    .map(|(t, p)| {
                        quant::convert(
                            t.data,
                            t.data_type,
                            p.data_type,
                            t.numel(),
                            src_order,
                            self.byte_order,
                        )
                        .map_err(|e| ModelError::for_tensor(&t.name, e))
                    })
                    .collect()
            });

            for (j, ((t, p), data)) in window.iter().zip(converted).enumerate() {
                let data = data?;
                info!(
                    "[{:3}/{}] Writing tensor {:38} | size {} | type {} | T+{:4}",
                    w * self.concurrency + j + 1,
                    total,
                    t.name,
                    t.shape,
                    p.data_type,
                    start.elapsed().as_secs()
                );
                writer.write_tensor_data(out, &data)?;
            }
        }

        writer.finish(out)
    }
}

/// Whether `output` and `input` name the same file. The output usually does
/// not exist yet, so its parent directory is canonicalized instead.
pub fn paths_collide(output: &Path, input: &Path) -> bool {
    fn resolve(path: &Path) -> Option<PathBuf> {
        if let Ok(p) = path.canonicalize() {
            return Some(p);
        }
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        Some(parent.canonicalize().ok()?.join(path.file_name()?))
    }

    match (resolve(output), resolve(input)) {
        (Some(a), Some(b)) => a == b,
        _ => output == input,
    }
}

/// Pass `result` through, removing the file at `path` first if it is an error.
fn discard_on_error<T>(path: &Path, result: Result<T>) -> Result<T> {
    if result.is_err() {
        match fs::remove_file(path) {
            Ok(()) => warn!(path = %path.display(), "Removed partial output file"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not remove partial output file")
            }
        }
    }
    result
}
