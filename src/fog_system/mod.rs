pub mod density_field;
pub mod fog_volume;
pub mod preintegration;
