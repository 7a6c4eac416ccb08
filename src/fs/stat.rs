#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatType {
    Directory = 1,
    File,
    Device,
}

pub const KIND_DIR: i16 = StatType::Directory as i16;
pub const KIND_FILE: i16 = StatType::File as i16;
pub const KIND_DEVICE: i16 = StatType::Device as i16;

#[repr(C)]
#[derive(Default)]
pub struct Stat {
    /// FS's disk device.
    pub device: i32,
    /// Inode number.
    pub inode: u32,
    /// Type of file.
    pub kind: i16,
    /// Number of links to file.
    pub num_links: i16,
    /// Size of file in bytes.
    pub size: u64,
}
