mod bdd_steps;
mod container_sim;
mod scenarios;
mod test_helpers;
