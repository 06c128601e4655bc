pub mod light_array;
pub mod light_manager;
pub mod photon_tracer;
pub mod point_light;
