use std::collections::HashSet;

use tracing::info;

use gs_tensor::{ByteOrder, DataType, Shape};

use crate::error::{ModelError, Result};
use crate::gguf::reader::GgufFile;
use crate::sort;

/// One source tensor: name, on-disk shape, stored type and raw payload.
///
/// `data` borrows from the source file's memory map.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDescriptor<'a> {
    pub name: String,
    pub shape: Shape,
    pub data_type: DataType,
    pub data: &'a [u8],
}

impl TensorDescriptor<'_> {
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }
}

/// Ordered collection of source tensors.
///
/// Insertion order is significant; it is only ever changed by
/// [`Catalog::sort_layers`].
#[derive(Debug, Clone)]
pub struct Catalog<'a> {
    entries: Vec<TensorDescriptor<'a>>,
    names: HashSet<String>,
    /// Byte order of every payload in the catalog.
    byte_order: ByteOrder,
}

impl<'a> Catalog<'a> {
    pub fn new(byte_order: ByteOrder) -> Self {
        Catalog {
            entries: Vec::new(),
            names: HashSet::new(),
            byte_order,
        }
    }

    /// Read every tensor of `file`, in directory order.
    pub fn from_gguf(file: &'a GgufFile) -> Result<Catalog<'a>> {
        let mut catalog = Catalog::new(file.byte_order());
        let total = file.tensor_infos.len();
        for (i, info) in file.tensor_infos.iter().enumerate() {
            info!(
                "Reading tensor [{:3}/{}] {:38} | {} | {}",
                i + 1,
                total,
                info.name,
                info.shape,
                info.dtype
            );
            let data = file.tensor_data(info)?;
            catalog.insert(TensorDescriptor {
                name: info.name.clone(),
                shape: info.shape.clone(),
                data_type: info.dtype,
                data,
            })?;
        }
        Ok(catalog)
    }

    /// Append a tensor. Names must be unique and the payload must hold
    /// exactly `numel` elements of `data_type`.
    pub fn insert(&mut self, tensor: TensorDescriptor<'a>) -> Result<()> {
        if self.names.contains(&tensor.name) {
            return Err(ModelError::DuplicateTensor(tensor.name));
        }
        let expected = tensor
            .data_type
            .elements_to_bytes(tensor.numel())
            .map_err(|e| ModelError::for_tensor(&tensor.name, e))?;
        if tensor.data.len() != expected {
            return Err(ModelError::TensorSizeMismatch {
                name: tensor.name,
                expected,
                got: tensor.data.len(),
            });
        }
        self.names.insert(tensor.name.clone());
        self.entries.push(tensor);
        Ok(())
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorDescriptor<'a>> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|t| t.name.as_str())
    }

    /// Consume the catalog and return it in canonical layer order.
    pub fn sort_layers(self) -> Result<Catalog<'a>> {
        let names: Vec<&str> = self.names().collect();
        let order = sort::sorted_order(&names)?;

        let mut slots: Vec<Option<TensorDescriptor<'a>>> =
            self.entries.into_iter().map(Some).collect();
        let entries = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect();

        Ok(Catalog {
            entries,
            names: self.names,
            byte_order: self.byte_order,
        })
    }
}

impl<'c, 'a> IntoIterator for &'c Catalog<'a> {
    type Item = &'c TensorDescriptor<'a>;
    type IntoIter = std::slice::Iter<'c, TensorDescriptor<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
