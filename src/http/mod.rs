pub mod descriptor;
pub mod head;
pub mod observer;
pub mod prober;
pub mod resolver;
pub mod result;
pub mod transport;
