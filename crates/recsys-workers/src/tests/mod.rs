mod determinism_test;
