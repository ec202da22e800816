//! Binary module format

use crate::definition::{CustomAttribute, TypeDef};
use crate::encoder::{Decode, DecodeError, Encode, MetadataReader, MetadataWriter};
use crate::name::TypeName;
use thiserror::Error;

/// Magic number for Weft module files: "WEFT"
pub const MAGIC: [u8; 4] = *b"WEFT";

/// Current module format version
pub const VERSION: u32 = 1;

/// File extension of persisted modules
pub const MODULE_EXTENSION: &str = "wmod";

/// Size of the fixed header (magic + version + flags + checksum)
const HEADER_SIZE: usize = 16;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected WEFT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum of the payload
        actual: u32,
    },
}

/// Module flags
pub mod flags {
    /// Module was produced by the weaver
    pub const WOVEN: u32 = 1 << 0;
    /// Module is the system library
    pub const SYSTEM: u32 = 1 << 1;
}

/// Reference to another module this one depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    /// Module name (the scope of its type names)
    pub name: String,
    /// File the module was loaded from, when known
    pub path: Option<String>,
}

impl ModuleRef {
    /// Reference by name only
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }
}

/// A managed binary module
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Magic number (must be "WEFT")
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// Module name
    pub name: String,
    /// Referenced modules
    pub references: Vec<ModuleRef>,
    /// Top-level types
    pub types: Vec<TypeDef>,
    /// Module-level custom attributes
    pub attributes: Vec<CustomAttribute>,
}

impl Module {
    /// Create an empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            name: name.into(),
            references: Vec::new(),
            types: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Whether `name` is listed among the references
    pub fn references_module(&self, name: &str) -> bool {
        self.references.iter().any(|reference| reference.name == name)
    }

    /// Add a reference unless one with the same name exists
    pub fn add_reference(&mut self, reference: ModuleRef) -> bool {
        if self.references_module(&reference.name) || reference.name == self.name {
            return false;
        }
        self.references.push(reference);
        true
    }

    /// Name of a top-level type of this module
    pub fn type_name(&self, ty: &TypeDef) -> TypeName {
        TypeName::new(self.name.clone(), ty.namespace.clone(), ty.name.clone())
    }

    /// Type definition by name (top-level or nested)
    pub fn type_def(&self, name: &TypeName) -> Option<&TypeDef> {
        if name.scope != self.name {
            return None;
        }
        let (first, rest) = name.path.split_first()?;
        let mut current = self
            .types
            .iter()
            .find(|ty| ty.namespace == name.namespace && &ty.name == first)?;
        for segment in rest {
            current = current.nested_type(segment)?;
        }
        Some(current)
    }

    /// Mutable type definition by name (top-level or nested)
    pub fn type_def_mut(&mut self, name: &TypeName) -> Option<&mut TypeDef> {
        if name.scope != self.name {
            return None;
        }
        let (first, rest) = name.path.split_first()?;
        let mut current = self
            .types
            .iter_mut()
            .find(|ty| ty.namespace == name.namespace && &ty.name == first)?;
        for segment in rest {
            current = current.nested_type_mut(segment)?;
        }
        Some(current)
    }

    /// Every type of the module, nested types included, depth-first
    pub fn all_types(&self) -> Vec<(TypeName, &TypeDef)> {
        let mut result = Vec::new();
        for ty in &self.types {
            ty.walk(&self.type_name(ty), &mut |name, def| {
                result.push((name.clone(), def))
            });
        }
        result
    }

    /// Encode module to binary format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
    /// - Name and references
    /// - Type table (nested types inline)
    /// - Module attributes
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = MetadataWriter::new();

        writer.emit_bytes(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);

        writer.emit_str(&self.name);
        self.references.encode(&mut writer);
        self.types.encode(&mut writer);
        self.attributes.encode(&mut writer);

        // CRC32 of everything after the header
        let checksum = crc32fast::hash(&writer.buffer[HEADER_SIZE..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a module from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        let mut reader = MetadataReader::new(data);

        let bytes = reader.read_bytes(4)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes);
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let calculated_checksum = crc32fast::hash(&data[HEADER_SIZE..]);
        if stored_checksum != calculated_checksum {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let name = reader.read_string()?;
        let references = Vec::<ModuleRef>::decode(&mut reader)?;
        let types = Vec::<TypeDef>::decode(&mut reader)?;
        let attributes = Vec::<CustomAttribute>::decode(&mut reader)?;

        Ok(Self {
            magic,
            version,
            flags,
            name,
            references,
            types,
            attributes,
        })
    }
}

impl Encode for ModuleRef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.name);
        self.path.encode(writer);
    }
}

impl Decode for ModuleRef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            path: Decode::decode(reader)?,
        })
    }
}
