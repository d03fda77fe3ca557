mod cadence_floor;
mod replicas;
mod window;
