pub mod sleeplock;
pub mod spinlock;
pub mod spinmutex;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum LockStrategy {
    #[default]
    Spin,
    Sleep,
}
